//! Map facade: configuration lifecycle and the per-frame driver
//!
//! The application drives two loops: the render loop calls
//! [`Map::render_frame`] every frame, and a dedicated data thread runs
//! [`DataRunner::run`] (or the embedding calls [`Map::data_tick`] itself).
//! All traversal state lives on the render side; the data side only works
//! the resource pipeline.

use crate::camera::camera::{Camera, CameraView};
use crate::camera::draws::MapDraws;
use crate::camera::traversal::traverse_layer;
use crate::core::options::MapOptions;
use crate::core::statistics::{CacheStatistics, CameraStatistics};
use crate::core::types::Result;
use crate::core::Error;
use crate::map::config::MapConfig;
use crate::map::layer::MapLayer;
use crate::resources::cache::ResourceCache;
use crate::resources::io::{CoordConvertor, Fetcher, GpuContext, ResourceDecoder};
use crate::resources::resource::{Resource, ResourceKind, Validity};
use crate::resources::scheduler::FetchScheduler;
use std::sync::Arc;

/// The external services the engine runs against
pub struct Collaborators {
    pub fetcher: Arc<dyn Fetcher>,
    pub decoder: Arc<dyn ResourceDecoder>,
    pub gpu: Arc<dyn GpuContext>,
    pub convertor: Arc<dyn CoordConvertor>,
}

/// The streaming map engine
pub struct Map {
    options: MapOptions,
    cache: Arc<ResourceCache>,
    scheduler: Arc<FetchScheduler>,
    convertor: Arc<dyn CoordConvertor>,

    config: Option<Arc<MapConfig>>,
    config_resource: Option<Arc<Resource>>,
    layers: Vec<MapLayer>,

    camera: Camera,
    tick: u64,
}

impl Map {
    pub fn new(collaborators: Collaborators, options: MapOptions) -> Map {
        let cache = Arc::new(ResourceCache::new());
        let scheduler = Arc::new(FetchScheduler::new(
            cache.clone(),
            collaborators.fetcher,
            collaborators.decoder,
            collaborators.gpu,
            options.max_concurrent_downloads,
            options.max_retries,
        ));
        Map {
            options,
            cache,
            scheduler,
            convertor: collaborators.convertor,
            config: None,
            config_resource: None,
            layers: Vec::new(),
            camera: Camera::new(),
            tick: 0,
        }
    }

    /// Handle for the data side; typically moved onto a dedicated thread
    pub fn data_runner(&self) -> DataRunner {
        DataRunner {
            scheduler: self.scheduler.clone(),
        }
    }

    /// Point the engine at a configuration document; switching documents
    /// cancels outstanding work and rebuilds all layers
    pub fn set_config_url(&mut self, url: &str) {
        if self
            .config_resource
            .as_ref()
            .map_or(false, |r| r.url() == url)
        {
            return;
        }
        log::info!("loading map configuration <{url}>");
        self.purge_view_cache();
        self.config = None;
        self.layers.clear();
        let resource = self.cache.get(url, ResourceKind::MapConfig);
        resource.update_priority(f32::INFINITY);
        self.config_resource = Some(resource);
    }

    fn check_config(&mut self) -> Result<()> {
        if self.config.is_some() {
            return Ok(());
        }
        let Some(resource) = &self.config_resource else {
            return Err(Error::Config("no configuration url set".into()));
        };
        match resource.validity() {
            Validity::Indeterminate => Ok(()),
            Validity::Invalid => Err(Error::Config(format!(
                "failed to load map configuration <{}>",
                resource.url()
            ))),
            Validity::Valid => {
                let config = resource.map_config().expect("valid config has payload");
                self.build_layers(&config);
                self.config = Some(config);
                Ok(())
            }
        }
    }

    fn build_layers(&mut self, config: &MapConfig) {
        self.layers.clear();
        let Some(view) = config.default_view() else {
            log::warn!("map configuration has no views");
            return;
        };
        if !view.surfaces.is_empty() {
            self.layers.push(MapLayer::surfaces_layer(
                config,
                view,
                !self.options.debug_disable_virtual_surfaces,
            ));
        }
        for name in &view.free_layers {
            match config.free_layers.get(name) {
                Some(fl) => self.layers.push(MapLayer::geodata_layer(name, fl)),
                None => log::warn!("view references missing free layer <{name}>"),
            }
        }
        log::info!("map configuration ready, {} layers", self.layers.len());
    }

    /// Run one frame: adopt the view, traverse every layer, schedule
    /// downloads, and evict over-budget resources
    ///
    /// Errors only on a fatal condition (unusable map configuration).
    pub fn render_frame(&mut self, view: &CameraView) -> Result<()> {
        self.tick = self.cache.advance_frame();
        self.camera
            .update_view(view, self.options.debug_detached_camera);
        self.camera.draws.clear();
        self.camera.statistics.reset_frame();

        if let Some(r) = &self.config_resource {
            self.cache.touch(r);
        }
        self.check_config()?;

        if let Some(config) = self.config.clone() {
            for layer in &mut self.layers {
                traverse_layer(
                    layer,
                    &mut self.camera,
                    &self.cache,
                    &config,
                    &self.options,
                    self.convertor.as_ref(),
                    self.tick,
                );
            }
        }

        self.scheduler.enqueue_from_cache();
        self.cache
            .eviction_pass(self.options.max_resources_memory, self.options.max_gpu_memory);
        Ok(())
    }

    /// Drop per-view traversal state and cancel outstanding work; `Ready`
    /// resources stay cached
    pub fn purge_view_cache(&mut self) {
        for layer in &mut self.layers {
            layer.purge();
        }
        self.cache.purge_non_ready();
        self.scheduler.clear_queues();
    }

    /// One data cycle on the calling thread, for embeddings without a
    /// dedicated data thread; returns whether anything was done
    pub fn data_tick(&self) -> bool {
        self.scheduler.run_cycle()
    }

    /// This frame's draw buffers
    pub fn draws(&self) -> &MapDraws {
        &self.camera.draws
    }

    pub fn statistics(&self) -> &CameraStatistics {
        &self.camera.statistics
    }

    pub fn cache_statistics(&self) -> CacheStatistics {
        self.cache.statistics()
    }

    pub fn config_ready(&self) -> bool {
        self.config.is_some()
    }

    pub fn options(&self) -> &MapOptions {
        &self.options
    }

    /// Replace the runtime options; traversal knobs apply next frame, the
    /// scheduler's concurrency and retry caps are fixed at construction
    pub fn set_options(&mut self, options: MapOptions) {
        self.options = options;
    }
}

impl Drop for Map {
    fn drop(&mut self) {
        self.scheduler.stop();
    }
}

/// Cloneable handle driving the data side of a [`Map`]
#[derive(Clone)]
pub struct DataRunner {
    scheduler: Arc<FetchScheduler>,
}

impl DataRunner {
    /// Data-thread main: blocks until work arrives, exits on `stop`
    pub fn run(&self) {
        self.scheduler.run_blocking();
    }

    /// One cycle without blocking
    pub fn run_cycle(&self) -> bool {
        self.scheduler.run_cycle()
    }

    pub fn stop(&self) {
        self.scheduler.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{DMat4, DVec3};
    use crate::math::Aabb;
    use crate::resources::io::{
        DecodedMesh, DecodedMeshAggregate, DecodedResource, DecodedSubmesh, DecodedTexture,
        FetchReply, IdentityConvertor,
    };
    use crate::testing::{view_from, MockDecoder, MockFetcher, NullGpu};
    use crate::tile::meta::flags;
    use crate::tile::{MetaNode, MetaTile, TileId};
    use std::sync::Arc;

    const CONFIG_JSON: &str = r#"{
        "referenceFrame": {
            "physicalSrs": "phys", "navigationSrs": "nav", "publicSrs": "pub",
            "body": { "majorRadius": 6378137.0, "minorRadius": 6356752.0 }
        },
        "surfaces": [{
            "id": "s",
            "lodRange": [0, 18],
            "metaUrl": "s-meta-{lod}-{x}-{y}",
            "meshUrl": "s-mesh-{lod}-{x}-{y}",
            "textureUrl": "s-tex-{lod}-{x}-{y}-{sub}"
        }],
        "views": [{ "surfaces": { "s": [] } }]
    }"#;

    fn root_meta_tile() -> MetaTile {
        let mut mt = MetaTile::new(TileId::new(0, 0, 0));
        mt.set(
            TileId::new(0, 0, 0),
            MetaNode {
                flags: flags::GEOMETRY,
                aabb_phys: Aabb::new(DVec3::splat(-10.0), DVec3::splat(10.0)),
                ..Default::default()
            },
        );
        mt
    }

    fn mesh_aggregate(model: DMat4) -> DecodedMeshAggregate {
        DecodedMeshAggregate {
            submeshes: vec![DecodedSubmesh {
                mesh: DecodedMesh {
                    vertex_count: 3,
                    data: vec![0u8; 36],
                },
                norm_to_phys: model,
                internal_uv: true,
                external_uv: false,
                texture_layer: None,
                surface_reference: 1,
            }],
        }
    }

    fn texture() -> DecodedTexture {
        DecodedTexture {
            width: 2,
            height: 2,
            components: 4,
            data: vec![0u8; 16],
        }
    }

    fn build_map(fetcher: MockFetcher, decoder: MockDecoder) -> Map {
        Map::new(
            Collaborators {
                fetcher: Arc::new(fetcher),
                decoder: Arc::new(decoder),
                gpu: Arc::new(NullGpu),
                convertor: Arc::new(IdentityConvertor),
            },
            MapOptions::default(),
        )
    }

    fn ok_replies(fetcher: &MockFetcher, urls: &[&str]) {
        for url in urls {
            fetcher.push_reply(url, FetchReply::ok(Vec::new()));
        }
    }

    #[test]
    fn test_single_tile_pipeline() {
        let model = DMat4::from_translation(DVec3::new(1.0, 2.0, 3.0));
        let fetcher = MockFetcher::new();
        ok_replies(
            &fetcher,
            &["config", "s-meta-0-0-0", "s-mesh-0-0-0", "s-tex-0-0-0-0"],
        );
        let decoder = MockDecoder::new();
        decoder.insert("config", DecodedResource::MapConfig(
            MapConfig::from_slice(CONFIG_JSON.as_bytes()).unwrap(),
        ));
        decoder.insert("s-meta-0-0-0", DecodedResource::MetaTile(root_meta_tile()));
        decoder.insert("s-mesh-0-0-0", DecodedResource::MeshAggregate(mesh_aggregate(model)));
        decoder.insert("s-tex-0-0-0-0", DecodedResource::Texture(texture()));

        let mut map = build_map(fetcher, decoder);
        map.set_config_url("config");

        let view = view_from(50.0);
        for _ in 0..8 {
            map.render_frame(&view).unwrap();
            map.data_tick();
            if !map.draws().is_empty() {
                break;
            }
        }

        assert!(map.config_ready());
        let draws = map.draws();
        assert_eq!(draws.opaque.len(), 1, "one opaque task for the single tile");
        assert!(draws.transparent.is_empty());
        assert_eq!(draws.colliders.len(), 1);

        let expected_mvp = (view.proj * view.view * model).as_mat4().to_cols_array();
        assert_eq!(draws.opaque[0].mvp, expected_mvp);
        assert_eq!(draws.opaque[0].uvm, crate::core::types::Mat3::IDENTITY.to_cols_array());
        assert!(!draws.opaque[0].external_uv);
        assert_eq!(map.statistics().nodes_rendered_total, 1);
    }

    #[test]
    fn test_draws_stable_across_frames() {
        let fetcher = MockFetcher::new();
        ok_replies(
            &fetcher,
            &["config", "s-meta-0-0-0", "s-mesh-0-0-0", "s-tex-0-0-0-0"],
        );
        let decoder = MockDecoder::new();
        decoder.insert("config", DecodedResource::MapConfig(
            MapConfig::from_slice(CONFIG_JSON.as_bytes()).unwrap(),
        ));
        decoder.insert("s-meta-0-0-0", DecodedResource::MetaTile(root_meta_tile()));
        decoder.insert(
            "s-mesh-0-0-0",
            DecodedResource::MeshAggregate(mesh_aggregate(DMat4::IDENTITY)),
        );
        decoder.insert("s-tex-0-0-0-0", DecodedResource::Texture(texture()));

        let mut map = build_map(fetcher, decoder);
        map.set_config_url("config");
        let view = view_from(50.0);
        for _ in 0..8 {
            map.render_frame(&view).unwrap();
            map.data_tick();
        }
        assert_eq!(map.draws().opaque.len(), 1);

        let started = map.cache_statistics().downloads_started;
        // further frames re-emit from cache without new downloads
        for _ in 0..3 {
            map.render_frame(&view).unwrap();
            map.data_tick();
            assert_eq!(map.draws().opaque.len(), 1);
        }
        assert_eq!(map.cache_statistics().downloads_started, started);
    }

    #[test]
    fn test_purge_recovers_from_cached_resources() {
        let fetcher = MockFetcher::new();
        ok_replies(
            &fetcher,
            &["config", "s-meta-0-0-0", "s-mesh-0-0-0", "s-tex-0-0-0-0"],
        );
        let decoder = MockDecoder::new();
        decoder.insert("config", DecodedResource::MapConfig(
            MapConfig::from_slice(CONFIG_JSON.as_bytes()).unwrap(),
        ));
        decoder.insert("s-meta-0-0-0", DecodedResource::MetaTile(root_meta_tile()));
        decoder.insert(
            "s-mesh-0-0-0",
            DecodedResource::MeshAggregate(mesh_aggregate(DMat4::IDENTITY)),
        );
        decoder.insert("s-tex-0-0-0-0", DecodedResource::Texture(texture()));

        let mut map = build_map(fetcher, decoder);
        map.set_config_url("config");
        let view = view_from(50.0);
        for _ in 0..8 {
            map.render_frame(&view).unwrap();
            map.data_tick();
        }
        assert_eq!(map.draws().opaque.len(), 1);
        let started = map.cache_statistics().downloads_started;

        map.purge_view_cache();

        // the tree is rebuilt from still-cached resources, no new fetches
        for _ in 0..3 {
            map.render_frame(&view).unwrap();
            map.data_tick();
        }
        assert_eq!(map.draws().opaque.len(), 1);
        assert_eq!(map.cache_statistics().downloads_started, started);
    }

    #[test]
    fn test_config_failure_is_fatal() {
        let fetcher = MockFetcher::new();
        // no reply scripted: every fetch 404s
        let mut map = build_map(fetcher, MockDecoder::new());
        map.set_config_url("config");

        let view = view_from(50.0);
        let mut failed = false;
        for _ in 0..4 {
            let result = map.render_frame(&view);
            map.data_tick();
            if result.is_err() {
                failed = true;
                break;
            }
        }
        assert!(failed, "unusable configuration surfaces as an error");
    }

    #[test]
    fn test_render_without_config_url() {
        let mut map = build_map(MockFetcher::new(), MockDecoder::new());
        assert!(map.render_frame(&view_from(50.0)).is_err());
    }
}
