//! Stack-scoped allocation of texture units.
//!
//! A [`TextureUnitContext`] claims units from the end of the currently bound
//! range and releases them when dropped. A child context mutably borrows its
//! parent, so the parent cannot bind while the child is alive and sibling
//! ranges never overlap.

use log::debug;

use crate::error::{RenderError, RenderResult};
use crate::gpu::{SamplerBinding, TextureId, TextureKind, TextureUnit};

#[derive(Debug)]
pub struct TextureUnitAllocator {
    limit: u32,
    bindings: Vec<(SamplerBinding, TextureKind)>,
    /// First binding index owned by each live context, outermost first.
    frames: Vec<usize>,
    high_water: u32,
}

impl TextureUnitAllocator {
    /// `configured` lowers the hardware count; it never raises it.
    pub fn new(hardware_units: u32, configured: Option<u32>) -> Self {
        let limit = match configured {
            Some(units) if units < hardware_units => units,
            _ => hardware_units,
        };
        debug!("Texture unit allocator limited to {} units", limit);
        Self {
            limit,
            bindings: Vec::with_capacity(limit as usize),
            frames: Vec::new(),
            high_water: 0,
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Highest number of units claimed at once since construction.
    pub fn high_water(&self) -> u32 {
        self.high_water
    }

    pub fn claimed(&self) -> u32 {
        self.bindings.len() as u32
    }

    /// Opens the outermost context. Contexts leaked by `mem::forget` are
    /// discarded here.
    pub fn root(&mut self) -> TextureUnitContext<'_> {
        if !self.frames.is_empty() {
            log::warn!(
                "Discarding {} texture unit contexts that were never closed",
                self.frames.len()
            );
            self.frames.clear();
            self.bindings.clear();
        }
        self.push_frame()
    }

    fn push_frame(&mut self) -> TextureUnitContext<'_> {
        let first = self.bindings.len();
        self.frames.push(first);
        let depth = self.frames.len();
        TextureUnitContext {
            allocator: self,
            first,
            depth,
        }
    }

    fn bind(&mut self, texture: TextureId, kind: TextureKind) -> RenderResult<TextureUnit> {
        let unit = self.bindings.len() as u32;
        if unit >= self.limit {
            return Err(RenderError::InsufficientUnits {
                requested: unit + 1,
                available: self.limit,
            });
        }
        let binding = SamplerBinding {
            unit: TextureUnit(unit),
            texture,
        };
        self.bindings.push((binding, kind));
        self.high_water = self.high_water.max(unit + 1);
        Ok(binding.unit)
    }
}

/// One live frame of the allocator stack.
#[derive(Debug)]
pub struct TextureUnitContext<'a> {
    allocator: &'a mut TextureUnitAllocator,
    first: usize,
    depth: usize,
}

impl TextureUnitContext<'_> {
    /// Opens a nested context starting after this context's units.
    pub fn child(&mut self) -> TextureUnitContext<'_> {
        self.allocator.push_frame()
    }

    pub fn bind_texture_2d(&mut self, texture: TextureId) -> RenderResult<TextureUnit> {
        self.allocator.bind(texture, TextureKind::D2)
    }

    pub fn bind_texture_cube(&mut self, texture: TextureId) -> RenderResult<TextureUnit> {
        self.allocator.bind(texture, TextureKind::Cube)
    }

    /// First unit owned by this context.
    pub fn first(&self) -> u32 {
        self.first as u32
    }

    /// Units claimed by this context itself.
    pub fn count(&self) -> u32 {
        (self.allocator.bindings.len() - self.first) as u32
    }

    /// Every live binding, from the root context down to this one, in unit
    /// order.
    pub fn bindings(&self) -> Vec<SamplerBinding> {
        self.allocator
            .bindings
            .iter()
            .map(|(binding, _)| *binding)
            .collect()
    }

    pub fn kind_of(&self, unit: TextureUnit) -> Option<TextureKind> {
        self.allocator
            .bindings
            .get(unit.0 as usize)
            .map(|(_, kind)| *kind)
    }
}

impl Drop for TextureUnitContext<'_> {
    fn drop(&mut self) {
        let allocator = &mut *self.allocator;
        allocator.bindings.truncate(self.first);
        allocator.frames.truncate(self.depth - 1);
    }
}
