//! Shared setup for the integration tests.
//!
//! Every test runs against the recording [`DummyDriver`], so command
//! streams and allocation counters can be asserted directly.

#![allow(dead_code)]

use std::sync::Arc;

use postfx_graph::backend::*;
use postfx_graph::materials::{MaterialKind, MaterialPackages};
use postfx_graph::postfx::ScenePass;
use postfx_graph::PostProcessManager;

/// Route `log` output through the test harness.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
        .is_test(true)
        .try_init();
}

/// A package for every material kind.
pub fn all_packages() -> MaterialPackages {
    let mut packages = MaterialPackages::new();
    for kind in MaterialKind::ALL {
        packages.insert(kind, kind.name().as_bytes().to_vec());
    }
    packages
}

pub fn color_desc(width: u32, height: u32) -> TextureDescriptor {
    TextureDescriptor::new_2d(width, height, TextureFormat::Rgba16Float)
}

// ============================================================================
// Test Context
// ============================================================================

/// A driver with an initialized post-process manager.
pub struct TestContext {
    pub driver: DummyDriver,
    pub manager: Option<PostProcessManager>,
    /// Textures owned by the test, standing in for the application's
    pub external: Vec<TextureHandle>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_driver(DummyDriver::new())
    }

    pub fn with_driver(mut driver: DummyDriver) -> Self {
        init_logging();
        let manager = PostProcessManager::init(&mut driver, &all_packages())
            .expect("Failed to initialize post-process manager");
        Self {
            driver,
            manager: Some(manager),
            external: Vec::new(),
        }
    }

    pub fn manager(&self) -> &PostProcessManager {
        self.manager.as_ref().expect("manager already terminated")
    }

    /// Create a texture owned by the test, outside any graph.
    pub fn create_external(&mut self, desc: &TextureDescriptor) -> TextureHandle {
        let texture = self
            .driver
            .create_texture(desc)
            .expect("Failed to create external texture");
        self.external.push(texture);
        texture
    }

    /// Live textures the graph still owns.
    ///
    /// Excludes the manager's dummies and the test's external textures.
    pub fn leaked_textures(&self) -> usize {
        let dummies = if self.manager.is_some() { 2 } else { 0 };
        self.driver.live_texture_count() - dummies - self.external.len()
    }

    /// Terminate the manager and destroy the external textures.
    pub fn finish(mut self) -> DummyDriver {
        if let Some(manager) = self.manager.take() {
            manager.terminate(&mut self.driver);
        }
        for texture in self.external.drain(..) {
            self.driver.destroy_texture(texture);
        }
        self.driver
    }
}

// ============================================================================
// Scene
// ============================================================================

/// Clears the structure target, standing in for a depth prepass.
pub struct ClearScene;

impl ScenePass for ClearScene {
    fn execute(
        &self,
        _pass_name: &str,
        target: RenderTargetHandle,
        params: &RenderPassParams,
        driver: &mut dyn Driver,
    ) -> DriverResult<()> {
        driver.begin_render_pass(target, params);
        driver.end_render_pass();
        Ok(())
    }
}

pub fn clear_scene() -> Arc<dyn ScenePass> {
    Arc::new(ClearScene)
}
