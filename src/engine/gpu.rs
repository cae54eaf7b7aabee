// ============================================================================
// Ressources GPU : arène de handles
// ============================================================================
// Toutes les ressources de rendu (géométries, matériaux, textures, buffers
// de particules, render targets) sont allouées ici et référencées par des
// handles typés.
//
// CONCEPT RUST : Ownership comme contrat d'allocation
// - Un handle n'est ni Copy ni Clone : il a un seul propriétaire
// - release() consomme le handle : une double libération ne compile pas
// - live_count() permet de vérifier qu'aucune ressource ne survit au teardown
// ============================================================================

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use tracing::{trace, warn};

/// Catégorie de ressource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Geometry,
    Material,
    Texture,
    ParticleBuffer,
    RenderTarget,
}

/// Marqueur de type pour les handles
pub trait ResourceMarker {
    const KIND: ResourceKind;
}

#[derive(Debug)]
pub enum GeometryKind {}
#[derive(Debug)]
pub enum MaterialKind {}
#[derive(Debug)]
pub enum TextureKind {}
#[derive(Debug)]
pub enum ParticleBufferKind {}
#[derive(Debug)]
pub enum RenderTargetKind {}

impl ResourceMarker for GeometryKind {
    const KIND: ResourceKind = ResourceKind::Geometry;
}
impl ResourceMarker for MaterialKind {
    const KIND: ResourceKind = ResourceKind::Material;
}
impl ResourceMarker for TextureKind {
    const KIND: ResourceKind = ResourceKind::Texture;
}
impl ResourceMarker for ParticleBufferKind {
    const KIND: ResourceKind = ResourceKind::ParticleBuffer;
}
impl ResourceMarker for RenderTargetKind {
    const KIND: ResourceKind = ResourceKind::RenderTarget;
}

/// Handle exclusif vers une ressource de l'arène
pub struct Handle<K: ResourceMarker> {
    id: u64,
    _kind: PhantomData<K>,
}

impl<K: ResourceMarker> Handle<K> {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl<K: ResourceMarker> fmt::Debug for Handle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}#{}", K::KIND, self.id)
    }
}

impl<K: ResourceMarker> PartialEq for Handle<K> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

pub type GeometryHandle = Handle<GeometryKind>;
pub type MaterialHandle = Handle<MaterialKind>;
pub type TextureHandle = Handle<TextureKind>;
pub type ParticleBufferHandle = Handle<ParticleBufferKind>;
pub type RenderTargetHandle = Handle<RenderTargetKind>;

/// Géométrie sphérique d'un noeud
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphereGeometry {
    pub radius: f32,
    pub segments: u32,
}

/// Texture chargée depuis l'imageUrl d'un instrument
#[derive(Debug, Clone, PartialEq)]
pub struct Texture {
    pub byte_len: usize,
}

/// Paramètres de matériau d'un noeud
#[derive(Debug)]
pub struct Material {
    pub color: [f32; 3],
    /// Intensité émissive (dérivée de l'énergie)
    pub emissive: f32,
    /// Texture appliquée, possédée par le matériau
    pub map: Option<TextureHandle>,
}

impl Material {
    pub fn new(color: [f32; 3], emissive: f32) -> Self {
        Self {
            color,
            emissive,
            map: None,
        }
    }
}

#[derive(Debug)]
enum Resource {
    Geometry(SphereGeometry),
    Material(Material),
    Texture(Texture),
    ParticleBuffer { capacity: usize },
    RenderTarget { width: usize, height: usize },
}

impl Resource {
    fn kind(&self) -> ResourceKind {
        match self {
            Resource::Geometry(_) => ResourceKind::Geometry,
            Resource::Material(_) => ResourceKind::Material,
            Resource::Texture(_) => ResourceKind::Texture,
            Resource::ParticleBuffer { .. } => ResourceKind::ParticleBuffer,
            Resource::RenderTarget { .. } => ResourceKind::RenderTarget,
        }
    }

    /// Estimation de la mémoire occupée
    fn bytes(&self) -> usize {
        match self {
            Resource::Geometry(g) => {
                let vertices = (g.segments as usize + 1).pow(2);
                vertices * 8 * std::mem::size_of::<f32>()
            }
            Resource::Material(_) => 64,
            Resource::Texture(t) => t.byte_len,
            Resource::ParticleBuffer { capacity } => capacity * 6 * std::mem::size_of::<f32>(),
            Resource::RenderTarget { width, height } => width * height * 4 * std::mem::size_of::<f32>(),
        }
    }
}

/// Arène de ressources GPU
#[derive(Debug, Default)]
pub struct GpuResources {
    resources: HashMap<u64, Resource>,
    next_id: u64,
}

impl GpuResources {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert<K: ResourceMarker>(&mut self, resource: Resource) -> Handle<K> {
        debug_assert_eq!(resource.kind(), K::KIND);
        self.next_id += 1;
        let id = self.next_id;
        trace!(id, kind = ?K::KIND, "GPU resource allocated");
        self.resources.insert(id, resource);
        Handle {
            id,
            _kind: PhantomData,
        }
    }

    pub fn create_geometry(&mut self, geometry: SphereGeometry) -> GeometryHandle {
        self.insert(Resource::Geometry(geometry))
    }

    pub fn create_material(&mut self, material: Material) -> MaterialHandle {
        self.insert(Resource::Material(material))
    }

    pub fn create_texture(&mut self, texture: Texture) -> TextureHandle {
        self.insert(Resource::Texture(texture))
    }

    pub fn create_particle_buffer(&mut self, capacity: usize) -> ParticleBufferHandle {
        self.insert(Resource::ParticleBuffer { capacity })
    }

    pub fn create_render_target(&mut self, width: usize, height: usize) -> RenderTargetHandle {
        self.insert(Resource::RenderTarget { width, height })
    }

    pub fn geometry(&self, handle: &GeometryHandle) -> Option<&SphereGeometry> {
        match self.resources.get(&handle.id) {
            Some(Resource::Geometry(g)) => Some(g),
            _ => None,
        }
    }

    pub fn material(&self, handle: &MaterialHandle) -> Option<&Material> {
        match self.resources.get(&handle.id) {
            Some(Resource::Material(m)) => Some(m),
            _ => None,
        }
    }

    pub fn material_mut(&mut self, handle: &MaterialHandle) -> Option<&mut Material> {
        match self.resources.get_mut(&handle.id) {
            Some(Resource::Material(m)) => Some(m),
            _ => None,
        }
    }

    pub fn texture(&self, handle: &TextureHandle) -> Option<&Texture> {
        match self.resources.get(&handle.id) {
            Some(Resource::Texture(t)) => Some(t),
            _ => None,
        }
    }

    pub fn particle_capacity(&self, handle: &ParticleBufferHandle) -> Option<usize> {
        match self.resources.get(&handle.id) {
            Some(Resource::ParticleBuffer { capacity }) => Some(*capacity),
            _ => None,
        }
    }

    pub fn render_target_size(&self, handle: &RenderTargetHandle) -> Option<(usize, usize)> {
        match self.resources.get(&handle.id) {
            Some(Resource::RenderTarget { width, height }) => Some((*width, *height)),
            _ => None,
        }
    }

    /// Libère une ressource (consomme le handle)
    ///
    /// Un matériau libère aussi la texture qu'il possède.
    pub fn release<K: ResourceMarker>(&mut self, handle: Handle<K>) {
        match self.resources.remove(&handle.id) {
            Some(Resource::Material(material)) => {
                if let Some(texture) = material.map {
                    self.release(texture);
                }
            }
            Some(_) => {}
            None => warn!(id = handle.id, kind = ?K::KIND, "Releasing unknown GPU resource"),
        }
        trace!(id = handle.id, kind = ?K::KIND, "GPU resource released");
    }

    /// Nombre total de ressources vivantes
    pub fn live_count(&self) -> usize {
        self.resources.len()
    }

    pub fn count(&self, kind: ResourceKind) -> usize {
        self.resources.values().filter(|r| r.kind() == kind).count()
    }

    pub fn allocated_bytes(&self) -> usize {
        self.resources.values().map(Resource::bytes).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_release() {
        let mut gpu = GpuResources::new();
        let geometry = gpu.create_geometry(SphereGeometry { radius: 1.0, segments: 16 });
        let buffer = gpu.create_particle_buffer(128);
        assert_eq!(gpu.live_count(), 2);
        assert_eq!(gpu.particle_capacity(&buffer), Some(128));
        assert!(gpu.allocated_bytes() > 0);

        gpu.release(geometry);
        gpu.release(buffer);
        assert_eq!(gpu.live_count(), 0);
        assert_eq!(gpu.allocated_bytes(), 0);
    }

    #[test]
    fn test_material_release_frees_texture() {
        let mut gpu = GpuResources::new();
        let material = gpu.create_material(Material::new([1.0, 0.0, 0.0], 0.0));
        let texture = gpu.create_texture(Texture { byte_len: 512 });
        gpu.material_mut(&material).unwrap().map = Some(texture);

        assert_eq!(gpu.count(ResourceKind::Texture), 1);
        gpu.release(material);
        assert_eq!(gpu.live_count(), 0);
    }

    #[test]
    fn test_handle_kinds_do_not_alias() {
        let mut gpu = GpuResources::new();
        let target = gpu.create_render_target(4, 2);
        assert_eq!(gpu.render_target_size(&target), Some((4, 2)));
        assert_eq!(gpu.count(ResourceKind::RenderTarget), 1);
        assert_eq!(gpu.count(ResourceKind::Material), 0);
        gpu.release(target);
    }
}
