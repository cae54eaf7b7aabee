// ============================================================================
// Scène : caméra, lumières, pipeline et cycle de vie des ressources
// ============================================================================
// La scène possède :
// - la caméra perspective et les lumières
// - l'arène GPU (GpuResources) où vivent tous les handles des noeuds
// - le composer (base pass + bloom pass)
//
// Cycle de vie : new() au montage, teardown() au démontage. Après teardown,
// la scène est "disposed" : aucun rendu, aucun callback tardif appliqué,
// et l'arène ne contient plus aucune ressource.
// ============================================================================

use glam::{Mat4, Vec3};
use tracing::{debug, info, warn};

use crate::config::SceneConfig;
use crate::engine::composer::{BloomSettings, Composer, FrameContext, Framebuffer};
use crate::engine::gpu::{GpuResources, Texture};
use crate::engine::registry::NodeRegistry;
use crate::models::NodeRef;

/// Taille de la surface de rendu en pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: usize,
    pub height: usize,
}

impl Viewport {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

/// Caméra perspective fixe, orientée vers l'origine
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
    pub aspect: f32,
    pub eye: Vec3,
    pub target: Vec3,
}

impl Camera {
    pub fn view_proj(&self) -> Mat4 {
        let proj = Mat4::perspective_rh(self.fov_y_degrees.to_radians(), self.aspect, self.near, self.far);
        let view = Mat4::look_at_rh(self.eye, self.target, Vec3::Y);
        proj * view
    }

    /// Distance focale en pixels pour une hauteur d'écran donnée
    pub fn focal_length(&self, height: usize) -> f32 {
        height as f32 / (2.0 * (self.fov_y_degrees.to_radians() * 0.5).tan())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AmbientLight {
    pub color: [f32; 3],
    pub intensity: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointLight {
    pub position: Vec3,
    pub color: [f32; 3],
    pub intensity: f32,
}

/// Résultat de l'application d'une texture arrivée en asynchrone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureOutcome {
    Applied,
    /// Le noeud a disparu (ou a été recréé) entre-temps
    StaleNode,
    /// La scène a déjà été détruite
    Disposed,
}

pub struct Scene {
    camera: Camera,
    ambient: AmbientLight,
    lights: Vec<PointLight>,
    gpu: GpuResources,
    composer: Option<Composer>,
    viewport: Viewport,
    disposed: bool,
}

impl Scene {
    pub fn new(viewport: Viewport, config: &SceneConfig) -> Self {
        let mut gpu = GpuResources::new();
        let composer = Composer::new(
            &mut gpu,
            viewport.width,
            viewport.height,
            BloomSettings {
                threshold: config.bloom_threshold,
                strength: config.bloom_strength,
                radius: config.bloom_radius,
            },
        );

        let camera = Camera {
            fov_y_degrees: config.fov_degrees,
            near: config.near,
            far: config.far,
            aspect: viewport.aspect(),
            eye: Vec3::new(0.0, 0.0, config.camera_distance),
            target: Vec3::ZERO,
        };

        // Lumières colorées à positions fixes
        let lights = vec![
            PointLight {
                position: Vec3::new(20.0, 20.0, 20.0),
                color: [0.2, 0.9, 1.0],
                intensity: 0.9,
            },
            PointLight {
                position: Vec3::new(-20.0, -15.0, 20.0),
                color: [1.0, 0.3, 0.9],
                intensity: 0.7,
            },
            PointLight {
                position: Vec3::new(0.0, 25.0, -10.0),
                color: [1.0, 0.75, 0.3],
                intensity: 0.5,
            },
        ];

        info!(width = viewport.width, height = viewport.height, "Scene initialized");
        Self {
            camera,
            ambient: AmbientLight {
                color: [1.0, 1.0, 1.0],
                intensity: config.ambient_intensity,
            },
            lights,
            gpu,
            composer: Some(composer),
            viewport,
            disposed: false,
        }
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn lights(&self) -> &[PointLight] {
        &self.lights
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn gpu(&self) -> &GpuResources {
        &self.gpu
    }

    pub(crate) fn gpu_mut(&mut self) -> &mut GpuResources {
        &mut self.gpu
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn composer_size(&self) -> Option<(usize, usize)> {
        self.composer.as_ref().map(Composer::size)
    }

    /// Adapte caméra et composer à la nouvelle taille
    ///
    /// Retourne false (et ne touche à rien) si la taille est inchangée.
    pub fn resize(&mut self, viewport: Viewport) -> bool {
        if self.disposed || viewport == self.viewport {
            return false;
        }
        self.viewport = viewport;
        self.camera.aspect = viewport.aspect();
        if let Some(composer) = self.composer.as_mut() {
            composer.set_size(&mut self.gpu, viewport.width, viewport.height);
        }
        debug!(width = viewport.width, height = viewport.height, aspect = self.camera.aspect, "Scene resized");
        true
    }

    /// Exécute le pipeline (base + bloom)
    pub fn render(&mut self, registry: &NodeRegistry) {
        if self.disposed {
            return;
        }
        let Some(composer) = self.composer.as_mut() else {
            return;
        };
        let ctx = FrameContext {
            view_proj: self.camera.view_proj(),
            focal: self.camera.focal_length(self.viewport.height),
            ambient: &self.ambient,
            lights: &self.lights,
        };
        composer.render(&ctx, registry, &self.gpu);
    }

    pub fn output(&self) -> Option<&Framebuffer> {
        self.composer.as_ref().map(Composer::output)
    }

    /// Applique une texture arrivée en asynchrone au matériau d'un noeud
    ///
    /// Garde-fous : scène détruite ou référence périmée -> no-op.
    pub fn apply_texture(&mut self, registry: &mut NodeRegistry, node: &NodeRef, bytes: Vec<u8>) -> TextureOutcome {
        if self.disposed {
            debug!(id = %node.id, "Texture arrived after teardown, dropped");
            return TextureOutcome::Disposed;
        }
        let Some(target) = registry.resolve_mut(node) else {
            debug!(id = %node.id, serial = node.serial, "Texture arrived for a removed node, dropped");
            return TextureOutcome::StaleNode;
        };

        let texture = self.gpu.create_texture(Texture { byte_len: bytes.len() });
        match self.gpu.material_mut(&target.mesh.material) {
            Some(material) => {
                let previous = material.map.replace(texture);
                if let Some(previous) = previous {
                    self.gpu.release(previous);
                }
                target.texture_token = None;
                debug!(id = %node.id, bytes = bytes.len(), "Texture applied");
                TextureOutcome::Applied
            }
            None => {
                warn!(id = %node.id, "Node material missing, texture released");
                self.gpu.release(texture);
                TextureOutcome::StaleNode
            }
        }
    }

    /// Libère toutes les ressources : noeuds puis render targets
    pub fn teardown(&mut self, registry: &mut NodeRegistry) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        registry.clear(&mut self.gpu);
        if let Some(composer) = self.composer.take() {
            composer.dispose(&mut self.gpu);
        }

        let leaked = self.gpu.live_count();
        if leaked > 0 {
            warn!(leaked, "GPU resources still alive after teardown");
        } else {
            info!("Scene torn down, all GPU resources released");
        }
    }
}
