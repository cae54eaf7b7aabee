// ============================================================================
// Pipeline de rendu : base pass + bloom pass
// ============================================================================
// Rasterizer logiciel qui dessine dans un framebuffer RGB flottant :
//
//   registre ──► BasePass ──► [base] ──► BloomPass ──► [output]
//
// - BasePass : sphères éclairées (impostors), arêtes de connexion,
//   particules additives, avec depth test
// - BloomPass : seuil de luminance, flou box séparable, composition additive
//
// Chaque pass possède un render target alloué dans l'arène GPU.
// ============================================================================

use glam::{Mat4, Vec3};
use tracing::debug;

use crate::engine::gpu::{GpuResources, RenderTargetHandle};
use crate::engine::registry::NodeRegistry;
use crate::engine::scene::{AmbientLight, PointLight};

const BACKGROUND: [f32; 3] = [0.01, 0.01, 0.03];

/// Buffer couleur + profondeur
#[derive(Debug, Clone)]
pub struct Framebuffer {
    width: usize,
    height: usize,
    color: Vec<[f32; 3]>,
    depth: Vec<f32>,
}

impl Framebuffer {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            color: vec![BACKGROUND; width * height],
            depth: vec![f32::INFINITY; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixel(&self, x: usize, y: usize) -> [f32; 3] {
        if x < self.width && y < self.height {
            self.color[y * self.width + x]
        } else {
            BACKGROUND
        }
    }

    pub fn pixels(&self) -> &[[f32; 3]] {
        &self.color
    }

    fn clear(&mut self) {
        self.color.fill(BACKGROUND);
        self.depth.fill(f32::INFINITY);
    }

    fn index(&self, x: i64, y: i64) -> Option<usize> {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return None;
        }
        Some(y as usize * self.width + x as usize)
    }

    /// Écrit si plus proche que le contenu actuel
    fn write_depth_tested(&mut self, x: i64, y: i64, depth: f32, color: [f32; 3]) {
        if let Some(i) = self.index(x, y) {
            if depth < self.depth[i] {
                self.depth[i] = depth;
                self.color[i] = color;
            }
        }
    }

    /// Ajoute (blending additif) si visible, sans écrire la profondeur
    fn add_depth_tested(&mut self, x: i64, y: i64, depth: f32, color: [f32; 3]) {
        if let Some(i) = self.index(x, y) {
            if depth < self.depth[i] {
                let c = &mut self.color[i];
                c[0] += color[0];
                c[1] += color[1];
                c[2] += color[2];
            }
        }
    }
}

/// Paramètres figés pour une frame
pub struct FrameContext<'a> {
    pub view_proj: Mat4,
    /// Distance focale en pixels (hauteur / (2 * tan(fov/2)))
    pub focal: f32,
    pub ambient: &'a AmbientLight,
    pub lights: &'a [PointLight],
}

/// Point projeté à l'écran
#[derive(Debug, Clone, Copy)]
struct Projected {
    x: f32,
    y: f32,
    /// Profondeur en espace vue (w du clip space)
    depth: f32,
}

fn project(ctx: &FrameContext<'_>, width: usize, height: usize, point: Vec3) -> Option<Projected> {
    let clip = ctx.view_proj * point.extend(1.0);
    if clip.w <= f32::EPSILON {
        return None;
    }
    let ndc = clip.truncate() / clip.w;
    if !(0.0..=1.0).contains(&ndc.z) {
        return None;
    }
    Some(Projected {
        x: (ndc.x * 0.5 + 0.5) * width as f32,
        y: (1.0 - (ndc.y * 0.5 + 0.5)) * height as f32,
        depth: clip.w,
    })
}

fn luminance(c: [f32; 3]) -> f32 {
    0.2126 * c[0] + 0.7152 * c[1] + 0.0722 * c[2]
}

fn scale(c: [f32; 3], k: f32) -> [f32; 3] {
    [c[0] * k, c[1] * k, c[2] * k]
}

// ============================================================================
// Base pass
// ============================================================================

fn base_pass(target: &mut Framebuffer, ctx: &FrameContext<'_>, registry: &NodeRegistry, gpu: &GpuResources) {
    target.clear();
    let (w, h) = (target.width(), target.height());
    if w == 0 || h == 0 {
        return;
    }

    // Arêtes (derrière les sphères grâce au depth test)
    for node in registry.nodes() {
        let Some(a) = project(ctx, w, h, node.position()) else {
            continue;
        };
        for peer in node.connections().iter().filter_map(|c| registry.resolve(c)) {
            let Some(b) = project(ctx, w, h, peer.position()) else {
                continue;
            };
            let pc = peer.market().color;
            let nc = node.market().color;
            let color = scale([(nc[0] + pc[0]) * 0.5, (nc[1] + pc[1]) * 0.5, (nc[2] + pc[2]) * 0.5], 0.3);
            draw_line(target, a, b, color);
        }
    }

    // Sphères
    for node in registry.nodes() {
        let Some(center) = project(ctx, w, h, node.position()) else {
            continue;
        };
        let Some(material) = gpu.material(&node.mesh().material) else {
            continue;
        };
        let radius_px = node.size * ctx.focal / center.depth;
        if radius_px < 0.35 {
            target.write_depth_tested(center.x as i64, center.y as i64, center.depth, material.color);
            continue;
        }

        let shading = SphereShading {
            center: node.position(),
            radius: node.size,
            rotation: node.kinematics().rotation,
            color: material.color,
            emissive: material.emissive,
            textured: material.map.is_some(),
        };

        let Some((x0, x1, y0, y1)) = sphere_bounds(center, radius_px, w, h) else {
            continue;
        };
        for py in y0..=y1 {
            for px in x0..=x1 {
                let dx = (px as f32 + 0.5 - center.x) / radius_px;
                let dy = (py as f32 + 0.5 - center.y) / radius_px;
                let d2 = dx * dx + dy * dy;
                if d2 > 1.0 {
                    continue;
                }
                let nz = (1.0 - d2).sqrt();
                let normal = Vec3::new(dx, -dy, nz);
                let depth = center.depth - nz * node.size;
                target.write_depth_tested(px, py, depth, shading.shade(normal, ctx));
            }
        }
    }

    // Particules (additives)
    for node in registry.nodes() {
        let Some(cloud) = node.particles() else {
            continue;
        };
        let color = scale(cloud.color(), 0.45);
        for offset in cloud.offsets() {
            if let Some(p) = project(ctx, w, h, node.position() + *offset) {
                target.add_depth_tested(p.x as i64, p.y as i64, p.depth, color);
            }
        }
    }
}

/// Boîte englobante d'une sphère projetée, limitée au framebuffer
///
/// None si la sphère est entièrement hors écran.
fn sphere_bounds(center: Projected, radius_px: f32, w: usize, h: usize) -> Option<(i64, i64, i64, i64)> {
    let x0 = ((center.x - radius_px).floor() as i64).max(0);
    let x1 = ((center.x + radius_px).ceil() as i64).min(w as i64 - 1);
    let y0 = ((center.y - radius_px).floor() as i64).max(0);
    let y1 = ((center.y + radius_px).ceil() as i64).min(h as i64 - 1);
    (x0 <= x1 && y0 <= y1).then_some((x0, x1, y0, y1))
}

struct SphereShading {
    center: Vec3,
    radius: f32,
    rotation: f32,
    color: [f32; 3],
    emissive: f32,
    textured: bool,
}

impl SphereShading {
    /// Éclairage : ambiant + diffus par point light + émissif
    ///
    /// La caméra regarde le long de -Z sans rotation : la normale en
    /// espace vue est aussi la normale monde.
    fn shade(&self, normal: Vec3, ctx: &FrameContext<'_>) -> [f32; 3] {
        let surface = self.center + normal * self.radius;
        let mut light = scale(ctx.ambient.color, ctx.ambient.intensity);
        for point in ctx.lights {
            let dir = (point.position - surface).normalize_or_zero();
            let diffuse = normal.dot(dir).max(0.0) * point.intensity;
            light[0] += point.color[0] * diffuse;
            light[1] += point.color[1] * diffuse;
            light[2] += point.color[2] * diffuse;
        }

        // Méridiens qui tournent avec le noeud
        let longitude = normal.x.atan2(normal.z) + self.rotation;
        let band = 0.85 + 0.15 * (longitude * 4.0).cos();

        let mut out = [0.0; 3];
        for i in 0..3 {
            out[i] = self.color[i] * (light[i] * band + self.emissive);
        }

        if self.textured {
            let rim = (1.0 - normal.z).powi(2) * 0.6;
            for c in &mut out {
                *c += rim;
            }
        }
        out
    }
}

/// Segment depth-testé (DDA)
fn draw_line(target: &mut Framebuffer, a: Projected, b: Projected, color: [f32; 3]) {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let steps = dx.abs().max(dy.abs()).ceil().max(1.0);
    // Évite les segments démesurés quand un point frôle le plan near
    if steps > 4.0 * (target.width() + target.height()) as f32 {
        return;
    }
    let n = steps as i64;
    for i in 0..=n {
        let t = i as f32 / steps;
        let x = a.x + dx * t;
        let y = a.y + dy * t;
        let depth = a.depth + (b.depth - a.depth) * t;
        target.write_depth_tested(x as i64, y as i64, depth, color);
    }
}

// ============================================================================
// Bloom pass
// ============================================================================

/// Réglages du bloom
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BloomSettings {
    pub threshold: f32,
    pub strength: f32,
    pub radius: usize,
}

fn bloom_pass(source: &Framebuffer, output: &mut Framebuffer, scratch: &mut Vec<[f32; 3]>, settings: BloomSettings) {
    let (w, h) = (source.width(), source.height());
    let threshold = settings.threshold.clamp(0.0, 0.999);

    // 1. Extraction des zones lumineuses
    let mut bright: Vec<[f32; 3]> = source
        .pixels()
        .iter()
        .map(|&c| {
            let lum = luminance(c);
            if lum > threshold {
                scale(c, (lum - threshold) / (1.0 - threshold))
            } else {
                [0.0; 3]
            }
        })
        .collect();

    // 2. Flou box séparable (horizontal puis vertical)
    scratch.clear();
    scratch.resize(w * h, [0.0; 3]);
    box_blur(&bright, scratch, w, h, settings.radius, true);
    box_blur(scratch, &mut bright, w, h, settings.radius, false);

    // 3. Composition additive, clampée à [0, 1]
    for (i, out) in output.color.iter_mut().enumerate() {
        let base = source.color[i];
        let glow = bright[i];
        *out = [
            (base[0] + glow[0] * settings.strength).clamp(0.0, 1.0),
            (base[1] + glow[1] * settings.strength).clamp(0.0, 1.0),
            (base[2] + glow[2] * settings.strength).clamp(0.0, 1.0),
        ];
    }
    output.depth.copy_from_slice(&source.depth);
}

fn box_blur(src: &[[f32; 3]], dst: &mut [[f32; 3]], w: usize, h: usize, radius: usize, horizontal: bool) {
    let r = radius as i64;
    for y in 0..h {
        for x in 0..w {
            let mut acc = [0.0f32; 3];
            let mut n = 0.0f32;
            for k in -r..=r {
                let (sx, sy) = if horizontal {
                    (x as i64 + k, y as i64)
                } else {
                    (x as i64, y as i64 + k)
                };
                if sx < 0 || sy < 0 || sx as usize >= w || sy as usize >= h {
                    continue;
                }
                let c = src[sy as usize * w + sx as usize];
                acc[0] += c[0];
                acc[1] += c[1];
                acc[2] += c[2];
                n += 1.0;
            }
            dst[y * w + x] = scale(acc, 1.0 / n.max(1.0));
        }
    }
}

// ============================================================================
// Composer
// ============================================================================

#[derive(Debug)]
struct RenderTarget {
    handle: RenderTargetHandle,
    buffer: Framebuffer,
}

impl RenderTarget {
    fn new(gpu: &mut GpuResources, width: usize, height: usize) -> Self {
        Self {
            handle: gpu.create_render_target(width, height),
            buffer: Framebuffer::new(width, height),
        }
    }
}

/// Enchaîne base pass et bloom pass
#[derive(Debug)]
pub struct Composer {
    base: RenderTarget,
    bloom: RenderTarget,
    scratch: Vec<[f32; 3]>,
    settings: BloomSettings,
}

impl Composer {
    pub fn new(gpu: &mut GpuResources, width: usize, height: usize, settings: BloomSettings) -> Self {
        Self {
            base: RenderTarget::new(gpu, width, height),
            bloom: RenderTarget::new(gpu, width, height),
            scratch: Vec::new(),
            settings,
        }
    }

    pub fn size(&self) -> (usize, usize) {
        (self.base.buffer.width(), self.base.buffer.height())
    }

    pub fn settings(&self) -> BloomSettings {
        self.settings
    }

    /// Réalloue les deux render targets ; sans effet si la taille est identique
    pub fn set_size(&mut self, gpu: &mut GpuResources, width: usize, height: usize) -> bool {
        if self.size() == (width, height) {
            return false;
        }
        let base = std::mem::replace(&mut self.base, RenderTarget::new(gpu, width, height));
        let bloom = std::mem::replace(&mut self.bloom, RenderTarget::new(gpu, width, height));
        gpu.release(base.handle);
        gpu.release(bloom.handle);
        debug!(width, height, "Composer resized");
        true
    }

    pub fn render(&mut self, ctx: &FrameContext<'_>, registry: &NodeRegistry, gpu: &GpuResources) {
        base_pass(&mut self.base.buffer, ctx, registry, gpu);
        bloom_pass(&self.base.buffer, &mut self.bloom.buffer, &mut self.scratch, self.settings);
    }

    /// Image finale (après bloom)
    pub fn output(&self) -> &Framebuffer {
        &self.bloom.buffer
    }

    pub fn dispose(self, gpu: &mut GpuResources) {
        gpu.release(self.base.handle);
        gpu.release(self.bloom.handle);
    }
}
