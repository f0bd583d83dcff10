//! Per-pixel Gaussian-mixture background model (MOG2).
//!
//! Every pixel carries a small mixture of Gaussians over observed
//! intensities. Applying a frame classifies each pixel against the mixture
//! and, with a non-zero learning rate, folds the observation in. The
//! returned mask is 255 for foreground pixels, 0 for background.

use dart_types::PixelBuffer;
use machine_vision_formats::{pixel_format::Mono8, ImageData, ImageStride, Stride};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("image size changed: model is {model_w}x{model_h}, frame is {got_w}x{got_h}")]
    ImageSizeChanged {
        model_w: u32,
        model_h: u32,
        got_w: u32,
        got_h: u32,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

const MAX_GAUSSIANS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mog2Params {
    /// Squared Mahalanobis distance below which a sample matches a mode.
    pub var_threshold: f64,
    /// Cumulative weight share explained by background modes.
    pub background_ratio: f64,
    /// Variance given to a newly spawned mode.
    pub var_init: f64,
    pub var_min: f64,
    pub var_max: f64,
    /// Weight given to a newly spawned mode.
    pub weight_init: f64,
}

impl Default for Mog2Params {
    fn default() -> Self {
        Self {
            var_threshold: 16.0,
            background_ratio: 0.9,
            var_init: 15.0,
            var_min: 4.0,
            var_max: 75.0,
            weight_init: 0.05,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Mode {
    weight: f64,
    mean: f64,
    var: f64,
}

/// One pixel's mixture: modes kept sorted by weight, descending.
#[derive(Debug, Clone, Default)]
struct Mixture {
    modes: [Mode; MAX_GAUSSIANS],
    n_modes: usize,
}

impl Mixture {
    /// Classify `value` and optionally learn it. Returns true when the
    /// value belongs to the background.
    fn apply(&mut self, value: f64, learning_rate: f64, params: &Mog2Params) -> bool {
        let mut matched: Option<usize> = None;
        for i in 0..self.n_modes {
            let mode = &self.modes[i];
            let d = value - mode.mean;
            if d * d < params.var_threshold * mode.var {
                matched = Some(i);
                break;
            }
        }

        let is_background = match matched {
            Some(i) => self.is_background_mode(i, params),
            None => false,
        };

        if learning_rate > 0.0 {
            self.learn(value, matched, learning_rate, params);
        }
        is_background
    }

    /// Background modes are the heaviest ones that together explain
    /// `background_ratio` of the weight.
    fn is_background_mode(&self, index: usize, params: &Mog2Params) -> bool {
        let total: f64 = self.modes[..self.n_modes].iter().map(|m| m.weight).sum();
        if total <= 0.0 {
            return false;
        }
        let mut cumulative = 0.0;
        for i in 0..self.n_modes {
            cumulative += self.modes[i].weight / total;
            if i == index {
                return true;
            }
            if cumulative > params.background_ratio {
                return false;
            }
        }
        false
    }

    fn learn(&mut self, value: f64, matched: Option<usize>, lr: f64, params: &Mog2Params) {
        match matched {
            Some(i) => {
                // decay all weights, reinforce the matched mode
                for mode in &mut self.modes[..self.n_modes] {
                    mode.weight *= 1.0 - lr;
                }
                let mode = &mut self.modes[i];
                mode.weight += lr;
                let rho = lr;
                let d = value - mode.mean;
                mode.mean += rho * d;
                mode.var = (mode.var + rho * (d * d - mode.var)).clamp(params.var_min, params.var_max);
                // restore the weight-descending order
                let mut i = i;
                while i > 0 && self.modes[i].weight > self.modes[i - 1].weight {
                    self.modes.swap(i, i - 1);
                    i -= 1;
                }
            }
            None => {
                for mode in &mut self.modes[..self.n_modes] {
                    mode.weight *= 1.0 - lr;
                }
                let slot = if self.n_modes < MAX_GAUSSIANS {
                    self.n_modes += 1;
                    self.n_modes - 1
                } else {
                    // replace the weakest mode
                    MAX_GAUSSIANS - 1
                };
                self.modes[slot] = Mode {
                    weight: params.weight_init.max(lr),
                    mean: value,
                    var: params.var_init,
                };
            }
        }
        let total: f64 = self.modes[..self.n_modes].iter().map(|m| m.weight).sum();
        if total > 0.0 {
            for mode in &mut self.modes[..self.n_modes] {
                mode.weight /= total;
            }
        }
    }

    /// Seed the mixture from its first observation.
    fn init(&mut self, value: f64, params: &Mog2Params) {
        self.modes[0] = Mode {
            weight: 1.0,
            mean: value,
            var: params.var_init,
        };
        self.n_modes = 1;
    }
}

/// Gaussian-mixture background subtractor for mono8 frames.
///
/// Allocation is deferred to the first applied frame, which fixes the
/// model's size; later frames must match it.
pub struct BackgroundSubtractorMog2 {
    params: Mog2Params,
    size: Option<(u32, u32)>,
    mixtures: Vec<Mixture>,
    frames_seen: u64,
}

impl BackgroundSubtractorMog2 {
    pub fn new() -> Self {
        Self::with_params(Mog2Params::default())
    }

    pub fn with_params(params: Mog2Params) -> Self {
        Self {
            params,
            size: None,
            mixtures: Vec::new(),
            frames_seen: 0,
        }
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    /// Classify a frame against the model and fold it in at
    /// `learning_rate` (0 disables learning). Returns the 0/255
    /// foreground mask.
    pub fn apply<IM>(&mut self, im: &IM, learning_rate: f64) -> Result<PixelBuffer<Mono8>>
    where
        IM: ImageStride<Mono8>,
    {
        let (w, h) = (im.width(), im.height());
        match self.size {
            None => {
                self.size = Some((w, h));
                self.mixtures = vec![Mixture::default(); w as usize * h as usize];
            }
            Some((mw, mh)) if (mw, mh) != (w, h) => {
                return Err(Error::ImageSizeChanged {
                    model_w: mw,
                    model_h: mh,
                    got_w: w,
                    got_h: h,
                });
            }
            Some(_) => {}
        }

        let stride = im.stride();
        let data = im.image_data();
        let mut mask = Vec::with_capacity(w as usize * h as usize);
        let first_frame = self.frames_seen == 0;
        for y in 0..h as usize {
            let row = &data[y * stride..y * stride + w as usize];
            for (x, &px) in row.iter().enumerate() {
                let mixture = &mut self.mixtures[y * w as usize + x];
                let value = px as f64;
                let is_background = if first_frame && learning_rate > 0.0 {
                    mixture.init(value, &self.params);
                    true
                } else {
                    mixture.apply(value, learning_rate, &self.params)
                };
                mask.push(if is_background { 0 } else { 255 });
            }
        }
        self.frames_seen += 1;
        Ok(PixelBuffer::from_packed(w, h, mask))
    }
}

impl Default for BackgroundSubtractorMog2 {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(w: u32, h: u32, v: u8) -> PixelBuffer<Mono8> {
        PixelBuffer::<Mono8>::new_filled(w, h, v)
    }

    fn foreground_count(mask: &PixelBuffer<Mono8>) -> usize {
        mask.image_data.iter().filter(|&&v| v > 0).count()
    }

    #[test]
    fn learned_background_is_quiet() {
        let mut sub = BackgroundSubtractorMog2::new();
        for _ in 0..5 {
            sub.apply(&uniform(8, 8, 120), 0.5).unwrap();
        }
        let mask = sub.apply(&uniform(8, 8, 120), 0.0).unwrap();
        assert_eq!(foreground_count(&mask), 0);
    }

    #[test]
    fn novel_object_is_foreground() {
        let mut sub = BackgroundSubtractorMog2::new();
        for _ in 0..5 {
            sub.apply(&uniform(8, 8, 120), 0.5).unwrap();
        }
        let mut frame = uniform(8, 8, 120);
        for y in 0..8 {
            frame.image_data[y * 8 + 3] = 10; // dark stripe
        }
        let mask = sub.apply(&frame, 0.0).unwrap();
        assert_eq!(foreground_count(&mask), 8);
        for y in 0..8 {
            assert_eq!(mask.image_data[y * 8 + 3], 255);
        }
    }

    #[test]
    fn zero_learning_rate_does_not_adapt() {
        let mut sub = BackgroundSubtractorMog2::new();
        for _ in 0..5 {
            sub.apply(&uniform(4, 4, 100), 0.5).unwrap();
        }
        // presenting a different scene at lr=0 must not change the model
        for _ in 0..20 {
            sub.apply(&uniform(4, 4, 200), 0.0).unwrap();
        }
        let mask = sub.apply(&uniform(4, 4, 200), 0.0).unwrap();
        assert_eq!(foreground_count(&mask), 16);
        let mask = sub.apply(&uniform(4, 4, 100), 0.0).unwrap();
        assert_eq!(foreground_count(&mask), 0);
    }

    #[test]
    fn model_adapts_with_learning() {
        let mut sub = BackgroundSubtractorMog2::new();
        for _ in 0..5 {
            sub.apply(&uniform(4, 4, 100), 0.5).unwrap();
        }
        // a persistent change learned at a high rate becomes background
        for _ in 0..30 {
            sub.apply(&uniform(4, 4, 200), 0.5).unwrap();
        }
        let mask = sub.apply(&uniform(4, 4, 200), 0.0).unwrap();
        assert_eq!(foreground_count(&mask), 0);
    }

    #[test]
    fn size_change_is_rejected() {
        let mut sub = BackgroundSubtractorMog2::new();
        sub.apply(&uniform(8, 8, 0), 0.5).unwrap();
        let err = sub.apply(&uniform(4, 4, 0), 0.5).unwrap_err();
        assert!(matches!(err, Error::ImageSizeChanged { .. }));
    }
}
