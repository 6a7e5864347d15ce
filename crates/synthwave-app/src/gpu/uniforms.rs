use std::collections::HashMap;

use naga::{AddressSpace, Module, ScalarKind, TypeInner, VectorSize};

use crate::error::RenderError;

/// Group/binding every program uses for its uniform struct.
pub const UNIFORM_GROUP: u32 = 0;
pub const UNIFORM_BINDING: u32 = 0;

/// Shape of a reflected uniform member (also used for stage inputs/outputs).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformKind {
    Float,
    Int,
    Uint,
    Vec2,
    Vec3,
    Vec4,
    Mat4,
    Other,
}

impl UniformKind {
    pub fn from_type(inner: &TypeInner) -> Self {
        match inner {
            TypeInner::Scalar(scalar) => match scalar.kind {
                ScalarKind::Float => Self::Float,
                ScalarKind::Sint => Self::Int,
                ScalarKind::Uint => Self::Uint,
                _ => Self::Other,
            },
            TypeInner::Vector { size, scalar } if scalar.kind == ScalarKind::Float => match size {
                VectorSize::Bi => Self::Vec2,
                VectorSize::Tri => Self::Vec3,
                VectorSize::Quad => Self::Vec4,
            },
            TypeInner::Matrix {
                columns: VectorSize::Quad,
                rows: VectorSize::Quad,
                scalar,
            } if scalar.kind == ScalarKind::Float => Self::Mat4,
            _ => Self::Other,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Float => "f32",
            Self::Int => "i32",
            Self::Uint => "u32",
            Self::Vec2 => "vec2f",
            Self::Vec3 => "vec3f",
            Self::Vec4 => "vec4f",
            Self::Mat4 => "mat4x4f",
            Self::Other => "unsupported type",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformMember {
    pub name: String,
    pub offset: u32,
    pub kind: UniformKind,
}

/// Reflected layout of a program's uniform struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformLayout {
    pub members: Vec<UniformMember>,
    pub size: u32,
}

impl UniformLayout {
    /// Reflects the struct bound at `@group(0) @binding(0)`, if the module declares one.
    pub fn reflect(module: &Module) -> Result<Option<Self>, String> {
        for (_, var) in module.global_variables.iter() {
            if var.space != AddressSpace::Uniform {
                continue;
            }
            let Some(binding) = &var.binding else {
                continue;
            };
            if binding.group != UNIFORM_GROUP || binding.binding != UNIFORM_BINDING {
                continue;
            }
            let TypeInner::Struct { members, span } = &module.types[var.ty].inner else {
                return Err("uniform at @group(0) @binding(0) must be a struct".into());
            };
            let members = members
                .iter()
                .filter_map(|m| {
                    let name = m.name.clone()?;
                    Some(UniformMember {
                        name,
                        offset: m.offset,
                        kind: UniformKind::from_type(&module.types[m.ty].inner),
                    })
                })
                .collect();
            return Ok(Some(Self {
                members,
                size: *span,
            }));
        }
        Ok(None)
    }

    pub fn find(&self, name: &str) -> Option<&UniformMember> {
        self.members.iter().find(|m| m.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Uint(u32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    /// Column-major, as produced by `glam::Mat4::to_cols_array`.
    Mat4([f32; 16]),
}

impl UniformValue {
    fn kind(&self) -> UniformKind {
        match self {
            Self::Float(_) => UniformKind::Float,
            Self::Int(_) => UniformKind::Int,
            Self::Uint(_) => UniformKind::Uint,
            Self::Vec2(_) => UniformKind::Vec2,
            Self::Vec3(_) => UniformKind::Vec3,
            Self::Vec4(_) => UniformKind::Vec4,
            Self::Mat4(_) => UniformKind::Mat4,
        }
    }

    fn bytes(&self) -> &[u8] {
        match self {
            Self::Float(v) => bytemuck::bytes_of(v),
            Self::Int(v) => bytemuck::bytes_of(v),
            Self::Uint(v) => bytemuck::bytes_of(v),
            Self::Vec2(v) => bytemuck::cast_slice(v),
            Self::Vec3(v) => bytemuck::cast_slice(v),
            Self::Vec4(v) => bytemuck::cast_slice(v),
            Self::Mat4(v) => bytemuck::cast_slice(v),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ResolvedUniform {
    offset: usize,
    kind: UniformKind,
}

/// Host-side staging for one program's uniform struct.
///
/// Names resolve against the reflected layout once and are cached after that.
pub struct UniformBlock {
    layout: UniformLayout,
    cache: HashMap<String, ResolvedUniform>,
    staging: Vec<u8>,
    resolutions: usize,
}

impl UniformBlock {
    pub fn new(layout: UniformLayout) -> Self {
        let staging = vec![0; layout.size as usize];
        Self {
            layout,
            cache: HashMap::new(),
            staging,
            resolutions: 0,
        }
    }

    pub fn set(&mut self, name: &str, value: UniformValue) -> Result<(), RenderError> {
        let resolved = self.resolve(name)?;
        if resolved.kind != value.kind() {
            return Err(RenderError::UniformTypeMismatch {
                name: name.to_string(),
                expected: resolved.kind.name(),
            });
        }
        let bytes = value.bytes();
        self.staging[resolved.offset..resolved.offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn resolve(&mut self, name: &str) -> Result<ResolvedUniform, RenderError> {
        if let Some(hit) = self.cache.get(name) {
            return Ok(*hit);
        }
        let member = self
            .layout
            .find(name)
            .ok_or_else(|| RenderError::UniformNotFound(name.to_string()))?;
        let resolved = ResolvedUniform {
            offset: member.offset as usize,
            kind: member.kind,
        };
        self.resolutions += 1;
        log::trace!(
            "uniform {name} resolved at offset {} ({} lookups)",
            resolved.offset,
            self.resolutions
        );
        self.cache.insert(name.to_string(), resolved);
        Ok(resolved)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.staging
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Number of layout lookups performed (cache misses).
    #[cfg(test)]
    pub fn resolutions(&self) -> usize {
        self.resolutions
    }
}
