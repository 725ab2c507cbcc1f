use std::fmt::Display;

/// 同时在飞行中的帧的标签
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FrameLabel {
    A,
    B,
    C,
}
impl Display for FrameLabel {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
            Self::C => write!(f, "C"),
        }
    }
}
impl FrameLabel {
    #[inline]
    pub fn from_usize(idx: usize) -> Self {
        match idx {
            0 => Self::A,
            1 => Self::B,
            2 => Self::C,
            _ => panic!("Invalid frame index: {idx}"),
        }
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

pub struct FrameCounter {
    /// 当前的帧序号，一直累加
    frame_id: u64,
}
// new & init
impl FrameCounter {
    pub fn new(init_frame_id: u64) -> Self {
        Self { frame_id: init_frame_id }
    }
}
// update
impl FrameCounter {
    #[inline]
    pub fn next_frame(&mut self) {
        self.frame_id = self.frame_id.wrapping_add(1);
    }
}
// getters
impl FrameCounter {
    const FIF_COUNT: usize = 3;

    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    #[inline]
    pub const fn fif_count() -> usize {
        Self::FIF_COUNT
    }

    #[inline]
    pub const fn frame_labels() -> [FrameLabel; Self::FIF_COUNT] {
        [FrameLabel::A, FrameLabel::B, FrameLabel::C]
    }

    #[inline]
    pub fn frame_label(&self) -> FrameLabel {
        FrameLabel::from_usize((self.frame_id % Self::FIF_COUNT as u64) as usize)
    }

    #[inline]
    pub fn frame_name(&self) -> String {
        format!("[F{}{}]", self.frame_id, self.frame_label())
    }
}
