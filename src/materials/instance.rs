//! Material instance with bound parameters.
//!
//! A [`MaterialInstance`] holds the typed values and textures that the next
//! draw with its material will see. Values only reach the driver on
//! [`MaterialInstance::commit`].

use std::collections::BTreeMap;

use bytemuck::Pod;
use glam::{Vec2, Vec3, Vec4};

use crate::backend::{Driver, MaterialHandle, SamplerParams, TextureHandle, Viewport};

/// A typed parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    Bool(bool),
    Int(i32),
    UInt(u32),
    Float(f32),
    Float2(Vec2),
    Float3(Vec3),
    Float4(Vec4),
    /// Tightly packed float array (e.g. an array of `vec2`).
    FloatArray(Vec<f32>),
    /// A texture with its sampler options.
    Texture {
        texture: TextureHandle,
        sampler: SamplerParams,
    },
}

impl From<bool> for ParameterValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for ParameterValue {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for ParameterValue {
    fn from(value: u32) -> Self {
        Self::UInt(value)
    }
}

impl From<f32> for ParameterValue {
    fn from(value: f32) -> Self {
        Self::Float(value)
    }
}

impl From<Vec2> for ParameterValue {
    fn from(value: Vec2) -> Self {
        Self::Float2(value)
    }
}

impl From<Vec3> for ParameterValue {
    fn from(value: Vec3) -> Self {
        Self::Float3(value)
    }
}

impl From<Vec4> for ParameterValue {
    fn from(value: Vec4) -> Self {
        Self::Float4(value)
    }
}

/// Named parameter values, ordered by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterBlock {
    values: BTreeMap<String, ParameterValue>,
}

impl ParameterBlock {
    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.values.get(name)
    }

    /// Scalar float value of a parameter, if it is one.
    pub fn float(&self, name: &str) -> Option<f32> {
        match self.values.get(name)? {
            ParameterValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn float2(&self, name: &str) -> Option<Vec2> {
        match self.values.get(name)? {
            ParameterValue::Float2(v) => Some(*v),
            _ => None,
        }
    }

    pub fn float4(&self, name: &str) -> Option<Vec4> {
        match self.values.get(name)? {
            ParameterValue::Float4(v) => Some(*v),
            _ => None,
        }
    }

    pub fn texture(&self, name: &str) -> Option<TextureHandle> {
        match self.values.get(name)? {
            ParameterValue::Texture { texture, .. } => Some(*texture),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParameterValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn set(&mut self, name: &str, value: ParameterValue) -> bool {
        if self.values.get(name) == Some(&value) {
            return false;
        }
        self.values.insert(name.to_string(), value);
        true
    }
}

/// Parameter-bindable instance of a material.
#[derive(Debug)]
pub struct MaterialInstance {
    material: MaterialHandle,
    parameters: ParameterBlock,
    scissor: Viewport,
    dirty: bool,
}

impl MaterialInstance {
    /// The default instance of a material: no parameters, no scissoring.
    pub fn new(material: MaterialHandle) -> Self {
        Self {
            material,
            parameters: ParameterBlock::default(),
            scissor: Viewport::unbounded(),
            dirty: false,
        }
    }

    pub fn material(&self) -> MaterialHandle {
        self.material
    }

    pub fn set_parameter(&mut self, name: &str, value: impl Into<ParameterValue>) {
        self.dirty |= self.parameters.set(name, value.into());
    }

    pub fn set_texture(&mut self, name: &str, texture: TextureHandle, sampler: SamplerParams) {
        self.dirty |= self
            .parameters
            .set(name, ParameterValue::Texture { texture, sampler });
    }

    /// Set an array parameter from any plain-old-data element type made of floats.
    pub fn set_array<T: Pod>(&mut self, name: &str, values: &[T]) {
        let floats: &[f32] = bytemuck::cast_slice(values);
        self.dirty |= self
            .parameters
            .set(name, ParameterValue::FloatArray(floats.to_vec()));
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterValue> {
        self.parameters.get(name)
    }

    pub fn parameters(&self) -> &ParameterBlock {
        &self.parameters
    }

    pub fn scissor(&self) -> Viewport {
        self.scissor
    }

    pub fn set_scissor(&mut self, scissor: Viewport) {
        self.scissor = scissor;
    }

    /// Upload pending parameter changes.
    pub fn commit(&mut self, driver: &mut dyn Driver) {
        if self.dirty {
            driver.commit_parameters(self.material, &self.parameters);
            self.dirty = false;
        }
    }

    /// Make this instance's parameters current for the next draws.
    pub fn bind(&self, driver: &mut dyn Driver) {
        driver.bind_material(self.material);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DriverCommand, DummyDriver};

    #[test]
    fn test_commit_only_uploads_changes() {
        let mut driver = DummyDriver::new();
        let mut instance = MaterialInstance::new(MaterialHandle(7));

        instance.set_parameter("power", 2.0f32);
        instance.commit(&mut driver);
        instance.commit(&mut driver);
        instance.set_parameter("power", 2.0f32);
        instance.commit(&mut driver);
        assert_eq!(driver.committed_parameters(MaterialHandle(7)).len(), 1);

        instance.set_parameter("power", 3.0f32);
        instance.commit(&mut driver);
        let commits = driver.committed_parameters(MaterialHandle(7));
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[1].float("power"), Some(3.0));
    }

    #[test]
    fn test_array_parameter_is_flattened() {
        let mut instance = MaterialInstance::new(MaterialHandle(1));
        instance.set_array("kernel", &[Vec2::new(1.0, 0.0), Vec2::new(0.5, 0.25)]);
        assert_eq!(
            instance.parameter("kernel"),
            Some(&ParameterValue::FloatArray(vec![1.0, 0.0, 0.5, 0.25]))
        );
    }

    #[test]
    fn test_bind_records_material() {
        let mut driver = DummyDriver::new();
        let instance = MaterialInstance::new(MaterialHandle(3));
        instance.bind(&mut driver);
        assert_eq!(
            driver.commands(),
            &[DriverCommand::BindMaterial(MaterialHandle(3))]
        );
    }
}
