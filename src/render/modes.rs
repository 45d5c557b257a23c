//! Depth, stencil, color and cull state for a draw call

/// Comparison used by depth and stencil tests: `reference <op> stored`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompareFunction {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

impl CompareFunction {
    pub fn test<T: PartialOrd>(self, reference: T, stored: T) -> bool {
        match self {
            CompareFunction::Never => false,
            CompareFunction::Less => reference < stored,
            CompareFunction::Equal => reference == stored,
            CompareFunction::LessEqual => reference <= stored,
            CompareFunction::Greater => reference > stored,
            CompareFunction::NotEqual => reference != stored,
            CompareFunction::GreaterEqual => reference >= stored,
            CompareFunction::Always => true,
        }
    }

    pub(crate) fn to_wgpu(self) -> wgpu::CompareFunction {
        match self {
            CompareFunction::Never => wgpu::CompareFunction::Never,
            CompareFunction::Less => wgpu::CompareFunction::Less,
            CompareFunction::Equal => wgpu::CompareFunction::Equal,
            CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
            CompareFunction::Greater => wgpu::CompareFunction::Greater,
            CompareFunction::NotEqual => wgpu::CompareFunction::NotEqual,
            CompareFunction::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
            CompareFunction::Always => wgpu::CompareFunction::Always,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DepthMask {
    ReadOnly,
    ReadWrite,
}

/// Depth test configuration
///
/// `range` maps the clip-space depth of the draw into the depth buffer,
/// which is how layers are separated from each other.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DepthMode {
    pub func: CompareFunction,
    pub mask: DepthMask,
    pub range: [f32; 2],
}

impl DepthMode {
    pub fn disabled() -> Self {
        Self {
            func: CompareFunction::Always,
            mask: DepthMask::ReadOnly,
            range: [0.0, 1.0],
        }
    }

    pub fn writes_depth(&self) -> bool {
        self.mask == DepthMask::ReadWrite
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StencilOp {
    Keep,
    Zero,
    Replace,
    IncrementClamp,
    DecrementClamp,
    Invert,
}

impl StencilOp {
    /// New stored value before the write mask is applied
    pub fn apply(self, stored: u8, reference: u8) -> u8 {
        match self {
            StencilOp::Keep => stored,
            StencilOp::Zero => 0,
            StencilOp::Replace => reference,
            StencilOp::IncrementClamp => stored.saturating_add(1),
            StencilOp::DecrementClamp => stored.saturating_sub(1),
            StencilOp::Invert => !stored,
        }
    }

    pub(crate) fn to_wgpu(self) -> wgpu::StencilOperation {
        match self {
            StencilOp::Keep => wgpu::StencilOperation::Keep,
            StencilOp::Zero => wgpu::StencilOperation::Zero,
            StencilOp::Replace => wgpu::StencilOperation::Replace,
            StencilOp::IncrementClamp => wgpu::StencilOperation::IncrementClamp,
            StencilOp::DecrementClamp => wgpu::StencilOperation::DecrementClamp,
            StencilOp::Invert => wgpu::StencilOperation::Invert,
        }
    }
}

/// Stencil test configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StencilMode {
    pub func: CompareFunction,
    /// Compare mask applied to both the reference and the stored value
    pub mask: u32,
    pub reference: u32,
    pub write_mask: u32,
    pub fail: StencilOp,
    pub depth_fail: StencilOp,
    pub pass: StencilOp,
}

impl StencilMode {
    pub fn disabled() -> Self {
        Self {
            func: CompareFunction::Always,
            mask: 0,
            reference: 0,
            write_mask: 0,
            fail: StencilOp::Keep,
            depth_fail: StencilOp::Keep,
            pass: StencilOp::Keep,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.func == CompareFunction::Always
            && self.write_mask == 0
            && self.pass == StencilOp::Keep
    }
}

impl Default for StencilMode {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Blending of fragment output into the target
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColorMode {
    /// Overwrite the target
    Unblended,
    /// Premultiplied source-over: `src + dst * (1 - src.a)`
    AlphaBlended,
}

impl ColorMode {
    pub(crate) fn to_wgpu(self) -> Option<wgpu::BlendState> {
        match self {
            ColorMode::Unblended => None,
            ColorMode::AlphaBlended => Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CullFaceMode {
    Disabled,
    Back,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_functions() {
        assert!(CompareFunction::GreaterEqual.test(3u8, 3));
        assert!(CompareFunction::GreaterEqual.test(4u8, 3));
        assert!(!CompareFunction::GreaterEqual.test(2u8, 3));
        assert!(CompareFunction::LessEqual.test(0.5f32, 1.0));
        assert!(!CompareFunction::Never.test(1, 1));
        assert!(CompareFunction::Always.test(9, 1));
    }

    #[test]
    fn test_stencil_ops() {
        assert_eq!(StencilOp::Keep.apply(7, 3), 7);
        assert_eq!(StencilOp::Replace.apply(7, 3), 3);
        assert_eq!(StencilOp::IncrementClamp.apply(255, 0), 255);
        assert_eq!(StencilOp::DecrementClamp.apply(0, 0), 0);
        assert_eq!(StencilOp::Invert.apply(0x0F, 0), 0xF0);
    }

    #[test]
    fn test_disabled_stencil() {
        assert!(StencilMode::disabled().is_disabled());
        let mode = StencilMode {
            func: CompareFunction::GreaterEqual,
            mask: 0xFF,
            reference: 1,
            write_mask: 0xFF,
            fail: StencilOp::Keep,
            depth_fail: StencilOp::Keep,
            pass: StencilOp::Replace,
        };
        assert!(!mode.is_disabled());
    }
}
