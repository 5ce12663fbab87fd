//! Render target types for graph passes.
//!
//! A pass declares render targets over resources it already declared; the
//! executor turns each one into a physical target right before the pass
//! runs and destroys it right after.

use glam::Vec4;

use crate::backend::types::{TargetBufferFlags, MAX_COLOR_ATTACHMENTS};

use super::resource::ResourceId;

/// A resource level bound to an attachment slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Attachment {
    /// The resource to render to.
    pub resource: ResourceId,
    /// Mip level to render to (default: 0).
    pub level: u8,
}

impl Attachment {
    pub fn new(resource: ResourceId) -> Self {
        Self { resource, level: 0 }
    }

    /// Render to a specific mip level.
    pub fn at_level(resource: ResourceId, level: u8) -> Self {
        Self { resource, level }
    }
}

impl From<ResourceId> for Attachment {
    fn from(resource: ResourceId) -> Self {
        Self::new(resource)
    }
}

/// Describes a render target declared by a pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderTargetDesc {
    pub color: [Option<Attachment>; MAX_COLOR_ATTACHMENTS],
    pub depth: Option<Attachment>,
    pub stencil: Option<Attachment>,
    pub clear_color: Vec4,
    /// Attachments cleared when the render pass begins.
    pub clear_flags: TargetBufferFlags,
    /// Sample count, 0 is treated as 1.
    pub samples: u8,
}

impl Default for RenderTargetDesc {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderTargetDesc {
    pub fn new() -> Self {
        Self {
            color: [None; MAX_COLOR_ATTACHMENTS],
            depth: None,
            stencil: None,
            clear_color: Vec4::ZERO,
            clear_flags: TargetBufferFlags::NONE,
            samples: 0,
        }
    }

    /// Set the first color attachment.
    pub fn with_color(self, attachment: impl Into<Attachment>) -> Self {
        self.with_color_at(0, attachment)
    }

    pub fn with_color_at(mut self, index: usize, attachment: impl Into<Attachment>) -> Self {
        assert!(
            index < MAX_COLOR_ATTACHMENTS,
            "color attachment index {index} out of range"
        );
        self.color[index] = Some(attachment.into());
        self
    }

    pub fn with_depth(mut self, attachment: impl Into<Attachment>) -> Self {
        self.depth = Some(attachment.into());
        self
    }

    pub fn with_stencil(mut self, attachment: impl Into<Attachment>) -> Self {
        self.stencil = Some(attachment.into());
        self
    }

    pub fn with_clear_color(mut self, color: Vec4) -> Self {
        self.clear_color = color;
        self
    }

    pub fn with_clear_flags(mut self, flags: TargetBufferFlags) -> Self {
        self.clear_flags = flags;
        self
    }

    pub fn with_samples(mut self, samples: u8) -> Self {
        self.samples = samples;
        self
    }

    /// Slots that have an attachment.
    pub fn attachment_flags(&self) -> TargetBufferFlags {
        self.attachments()
            .fold(TargetBufferFlags::NONE, |flags, (slot, _)| flags | slot)
    }

    /// Every attachment with its slot flag, colors first.
    pub fn attachments(&self) -> impl Iterator<Item = (TargetBufferFlags, Attachment)> + '_ {
        let colors = self
            .color
            .iter()
            .enumerate()
            .filter_map(|(i, a)| a.map(|a| (TargetBufferFlags::color(i), a)));
        colors
            .chain(self.depth.map(|a| (TargetBufferFlags::DEPTH, a)))
            .chain(self.stencil.map(|a| (TargetBufferFlags::STENCIL, a)))
    }

    /// Effective sample count.
    pub fn sample_count(&self) -> u8 {
        self.samples.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_flags() {
        let color = ResourceId::new(0, 1);
        let depth = ResourceId::new(1, 1);
        let desc = RenderTargetDesc::new()
            .with_color(color)
            .with_depth(Attachment::at_level(depth, 2));

        assert_eq!(
            desc.attachment_flags(),
            TargetBufferFlags::COLOR | TargetBufferFlags::DEPTH
        );
        let attachments: Vec<_> = desc.attachments().collect();
        assert_eq!(attachments.len(), 2);
        assert_eq!(attachments[1].1.level, 2);
    }

    #[test]
    fn test_zero_samples_means_one() {
        assert_eq!(RenderTargetDesc::new().sample_count(), 1);
        assert_eq!(RenderTargetDesc::new().with_samples(4).sample_count(), 4);
    }
}
