// The smallest unit of audio; one stereo frame
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StereoFrame {
    pub left: f32,
    pub right: f32,
}

impl StereoFrame {
    pub fn zero() -> Self { // just giving `default` a better name for clarity
        Self::default()
    }

    pub fn mono(s: f32) -> Self {
        Self { left: s, right: s }
    }

    pub fn peak(&self) -> f32 {
        self.left.abs().max(self.right.abs())
    }
}

pub fn clear(buf: &mut [StereoFrame]) {
    buf.fill(StereoFrame::zero());
}

// out += src, frame by frame
pub fn mix_into(out: &mut [StereoFrame], src: &[StereoFrame]) {
    for (o, s) in out.iter_mut().zip(src) {
        o.left += s.left;
        o.right += s.right;
    }
}
