//! Fetch scheduling and the data-thread cycle
//!
//! The render thread enqueues resources due for download; the data thread
//! drains the queue into a priority-sorted batch, issues fetches through
//! the fetcher collaborator up to the concurrency cap, and processes
//! completed replies (classify status, decode, upload, publish). The cycle
//! body is a plain method so tests can drive it synchronously; production
//! runs it from a dedicated thread via [`FetchScheduler::run_blocking`].

use crate::resources::cache::ResourceCache;
use crate::resources::io::{
    DecodeError, DecodedResource, FetchQuery, FetchReply, Fetcher, GpuContext, ResourceDecoder,
};
use crate::resources::resource::{
    GpuMesh, GpuTexture, MeshAggregate, MeshPart, Resource, ResourcePayload, ResourceState,
};
use crate::tile::BoundMetaTile;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

struct PendingEntry {
    resource: Arc<Resource>,
    seq: u64,
}

struct CompletedFetch {
    resource: Arc<Resource>,
    reply: FetchReply,
}

#[derive(Default)]
struct QueueState {
    pending: Vec<PendingEntry>,
    completed: Vec<CompletedFetch>,
    next_seq: u64,
}

struct Shared {
    queue: Mutex<QueueState>,
    cv: Condvar,
    stop: AtomicBool,
    in_flight: AtomicUsize,
}

/// Single-producer/single-consumer fetch pipeline over the resource cache
pub struct FetchScheduler {
    shared: Arc<Shared>,
    cache: Arc<ResourceCache>,
    fetcher: Arc<dyn Fetcher>,
    decoder: Arc<dyn ResourceDecoder>,
    gpu: Arc<dyn GpuContext>,
    max_concurrent: usize,
    max_retries: u32,
}

impl FetchScheduler {
    pub fn new(
        cache: Arc<ResourceCache>,
        fetcher: Arc<dyn Fetcher>,
        decoder: Arc<dyn ResourceDecoder>,
        gpu: Arc<dyn GpuContext>,
        max_concurrent: usize,
        max_retries: u32,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(QueueState::default()),
                cv: Condvar::new(),
                stop: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
            }),
            cache,
            fetcher,
            decoder,
            gpu,
            max_concurrent: max_concurrent.max(1),
            max_retries,
        }
    }

    // --- Render-thread side ---

    /// Walk the cache for resources due for download and queue them;
    /// returns how many were added
    pub fn enqueue_from_cache(&self) -> usize {
        let due = self.cache.collect_pending();
        if due.is_empty() {
            return 0;
        }
        let mut queue = self.shared.queue.lock().unwrap();
        let mut added = 0;
        for resource in due {
            if resource.queued.swap(true, Ordering::Relaxed) {
                continue;
            }
            let seq = queue.next_seq;
            queue.next_seq += 1;
            queue.pending.push(PendingEntry { resource, seq });
            added += 1;
        }
        drop(queue);
        if added > 0 {
            self.shared.cv.notify_all();
        }
        added
    }

    /// Drop everything queued; in-flight fetches finish on their own and
    /// their replies are discarded if the resource was reset meanwhile
    pub fn clear_queues(&self) {
        let mut queue = self.shared.queue.lock().unwrap();
        for entry in queue.pending.drain(..) {
            entry.resource.queued.store(false, Ordering::Relaxed);
        }
        queue.completed.clear();
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue.lock().unwrap().pending.len()
    }

    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Ask the data thread to exit its blocking loop
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.cv.notify_all();
    }

    pub fn stopped(&self) -> bool {
        self.shared.stop.load(Ordering::Acquire)
    }

    // --- Data-thread side ---

    /// Block until there is work or a stop request, then run cycles; this
    /// is the data thread's main
    pub fn run_blocking(&self) {
        loop {
            {
                let mut queue = self.shared.queue.lock().unwrap();
                loop {
                    if self.shared.stop.load(Ordering::Acquire) {
                        return;
                    }
                    let can_issue = !queue.pending.is_empty()
                        && self.shared.in_flight.load(Ordering::Acquire) < self.max_concurrent;
                    if can_issue || !queue.completed.is_empty() {
                        break;
                    }
                    queue = self.shared.cv.wait(queue).unwrap();
                }
            }
            self.run_cycle();
        }
    }

    /// One scheduling cycle; returns whether anything was done
    pub fn run_cycle(&self) -> bool {
        let mut worked = false;

        // drain the queue into a batch sorted by descending priority,
        // ties broken by insertion order
        let mut batch = {
            let mut queue = self.shared.queue.lock().unwrap();
            std::mem::take(&mut queue.pending)
        };
        batch.sort_by(|a, b| {
            let pa = nan_lowest(a.resource.priority());
            let pb = nan_lowest(b.resource.priority());
            pb.total_cmp(&pa).then(a.seq.cmp(&b.seq))
        });

        let mut leftover = Vec::new();
        for entry in batch {
            if self.shared.in_flight.load(Ordering::Acquire) < self.max_concurrent {
                self.issue(entry.resource);
                worked = true;
            } else {
                leftover.push(entry);
            }
        }
        if !leftover.is_empty() {
            let mut queue = self.shared.queue.lock().unwrap();
            queue.pending.extend(leftover);
        }

        let completed = {
            let mut queue = self.shared.queue.lock().unwrap();
            std::mem::take(&mut queue.completed)
        };
        for c in completed {
            self.process_reply(c);
            worked = true;
        }

        worked
    }

    fn issue(&self, resource: Arc<Resource>) {
        if !resource.mark_downloading() {
            // purged or raced; nothing to do
            return;
        }
        self.cache.note_download_started();
        self.shared.in_flight.fetch_add(1, Ordering::AcqRel);

        let query = FetchQuery {
            url: resource.url().to_string(),
            kind: resource.kind(),
        };
        log::trace!("fetching <{}>", query.url);

        let shared = self.shared.clone();
        self.fetcher.fetch(
            query,
            Box::new(move |reply| {
                let mut queue = shared.queue.lock().unwrap();
                queue.completed.push(CompletedFetch { resource, reply });
                shared.in_flight.fetch_sub(1, Ordering::AcqRel);
                drop(queue);
                shared.cv.notify_all();
            }),
        );
    }

    fn process_reply(&self, completed: CompletedFetch) {
        let resource = completed.resource;
        if resource.state() != ResourceState::Downloading {
            // reset while the fetch was in flight; result no longer wanted
            log::trace!("discarding stale reply for <{}>", resource.url());
            return;
        }

        let status = completed.reply.status;
        if (200..300).contains(&status) {
            resource.set_state(ResourceState::Downloaded);
            self.cache.note_download_completed();
            let decoded = self
                .decoder
                .decode(resource.kind(), resource.url(), &completed.reply.body)
                .and_then(|d| self.upload_and_publish(&resource, d));
            if let Err(e) = decoded {
                if e.permanent {
                    resource.fail_permanent();
                } else {
                    resource.fail_decode();
                }
                self.cache.note_download_failed();
                log::warn!("decode failed for <{}>: {}", resource.url(), e);
            }
        } else if (400..500).contains(&status) {
            resource.fail_permanent();
            self.cache.note_download_failed();
            log::warn!("resource <{}> unavailable: http {}", resource.url(), status);
        } else {
            match resource.fail_transient(self.cache.tick(), self.max_retries) {
                ResourceState::Failed => {
                    self.cache.note_download_failed();
                    log::warn!(
                        "resource <{}> failed after {} retries",
                        resource.url(),
                        resource.retry_number()
                    );
                }
                _ => {
                    self.cache.note_retry_scheduled();
                    log::debug!(
                        "retry {} for <{}> after tick {}",
                        resource.retry_number(),
                        resource.url(),
                        resource.retry_after_tick()
                    );
                }
            }
        }
    }

    /// The upload step; the only place a resource's GPU object is set
    fn upload_and_publish(
        &self,
        resource: &Resource,
        decoded: DecodedResource,
    ) -> Result<(), DecodeError> {
        match decoded {
            DecodedResource::Buffer(data) => {
                let cost = data.len();
                resource.publish(ResourcePayload::RawBuffer(data.into()), None, cost, 0);
            }
            DecodedResource::Texture(t) => {
                let handle = self.gpu.upload_texture(&t)?;
                let cost = t.byte_size();
                resource.publish(
                    ResourcePayload::Texture(GpuTexture {
                        handle: handle.clone(),
                        width: t.width,
                        height: t.height,
                    }),
                    Some(handle),
                    cost,
                    cost,
                );
            }
            DecodedResource::Mesh(m) => {
                let handle = self.gpu.upload_mesh(&m)?;
                let cost = m.data.len();
                resource.publish(
                    ResourcePayload::Mesh(GpuMesh {
                        handle: handle.clone(),
                        vertex_count: m.vertex_count,
                    }),
                    Some(handle),
                    cost,
                    cost,
                );
            }
            DecodedResource::MetaTile(mt) => {
                let cost = mt.ram_cost();
                resource.publish(ResourcePayload::MetaTile(Arc::new(mt)), None, cost, 0);
            }
            DecodedResource::MeshAggregate(agg) => {
                let mut submeshes = Vec::with_capacity(agg.submeshes.len());
                let mut gpu_cost = 0usize;
                for s in &agg.submeshes {
                    let handle = self.gpu.upload_mesh(&s.mesh)?;
                    gpu_cost += s.mesh.data.len();
                    submeshes.push(MeshPart {
                        mesh: GpuMesh {
                            handle,
                            vertex_count: s.mesh.vertex_count,
                        },
                        norm_to_phys: s.norm_to_phys,
                        internal_uv: s.internal_uv,
                        external_uv: s.external_uv,
                        texture_layer: s.texture_layer.clone(),
                        surface_reference: s.surface_reference,
                    });
                }
                let ram = submeshes.len() * std::mem::size_of::<MeshPart>();
                resource.publish(
                    ResourcePayload::MeshAggregate(Arc::new(MeshAggregate { submeshes })),
                    None,
                    ram,
                    gpu_cost,
                );
            }
            DecodedResource::BoundMetaTile(b) => {
                resource.publish(
                    ResourcePayload::BoundMetaTile(Arc::new(b)),
                    None,
                    BoundMetaTile::CELLS,
                    0,
                );
            }
            DecodedResource::BoundLayerConfig(c) => {
                let cost = std::mem::size_of_val(&c);
                resource.publish(ResourcePayload::BoundLayerConfig(Arc::new(c)), None, cost, 0);
            }
            DecodedResource::MapConfig(c) => {
                let cost = std::mem::size_of_val(&c);
                resource.publish(ResourcePayload::MapConfig(Arc::new(c)), None, cost, 0);
            }
            DecodedResource::GeodataFeatures(data) => {
                let cost = data.len();
                resource.publish(ResourcePayload::GeodataFeatures(data.into()), None, cost, 0);
            }
            DecodedResource::GeodataStyle(data) => {
                let cost = data.len();
                resource.publish(ResourcePayload::GeodataStyle(data.into()), None, cost, 0);
            }
        }
        Ok(())
    }
}

/// NaN priorities sort below everything
fn nan_lowest(p: f32) -> f32 {
    if p.is_nan() {
        f32::NEG_INFINITY
    } else {
        p
    }
}
