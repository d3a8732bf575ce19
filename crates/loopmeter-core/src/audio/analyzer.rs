//! Amplitude and spectrum snapshots of a frozen capture window
//!
//! A real window of `W` samples has `W / 2` distinct transform bins below
//! Nyquist, so both views produce `W / 2` values regardless of mode:
//!
//! - **Amplitude**: mean absolute sample of each of the first `W / 2` frames,
//!   normalized by [`crate::MAX_AMPLITUDE`].
//! - **Spectrum**: magnitude of bins `0..W / 2` of a `W`-point transform of
//!   the raw interleaved window, divided by that bin's calibration maximum
//!   and clamped to 1.0.

use crate::audio::calibration::CalibrationTable;
use crate::audio::engine::EngineError;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// Transform working memory, allocated on start and freed on stop
struct Workspace {
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

/// Snapshot analyzer for one window geometry
///
/// The transform plan is built the first time a spectrum is requested (or
/// when [`Self::warm_plan`] is called) and kept for the analyzer's lifetime.
/// The transform runs in place, so its input is rewritten from the snapshot
/// before every use.
pub struct Analyzer {
    window_len: usize,
    channels: usize,
    calibration: CalibrationTable,
    plan: Option<Arc<dyn Fft<f32>>>,
    workspace: Option<Workspace>,
}

impl Analyzer {
    /// Create an analyzer for `window_len` interleaved samples of `channels`
    ///
    /// # Errors
    /// Fails if the window is empty or odd, not a whole number of frames,
    /// holds fewer than `window_len / 2` frames, or the calibration table
    /// does not have one entry per bin.
    pub fn new(
        window_len: usize,
        channels: u16,
        calibration: CalibrationTable,
    ) -> Result<Self, EngineError> {
        let channels = channels as usize;
        if channels == 0 {
            return Err(EngineError::Config("channel count must be positive".into()));
        }
        if window_len == 0 || window_len % channels != 0 {
            return Err(EngineError::Config(format!(
                "window of {} samples is not a whole number of {}-channel frames",
                window_len, channels
            )));
        }
        if window_len % 2 != 0 {
            return Err(EngineError::Config(format!(
                "window of {} samples has no whole half-spectrum",
                window_len
            )));
        }
        let bins = window_len / 2;
        if window_len / channels < bins {
            return Err(EngineError::Config(format!(
                "{} channels leave {} frames for {} output values",
                channels,
                window_len / channels,
                bins
            )));
        }
        calibration.check_len(bins)?;

        Ok(Self {
            window_len,
            channels,
            calibration,
            plan: None,
            workspace: None,
        })
    }

    /// Output length for both modes
    pub fn bin_count(&self) -> usize {
        self.window_len / 2
    }

    /// Window size in samples (also the transform size)
    pub fn window_len(&self) -> usize {
        self.window_len
    }

    /// Interleave stride
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Whether the transform plan has been built
    pub fn has_plan(&self) -> bool {
        self.plan.is_some()
    }

    /// Whether transform buffers are currently allocated
    pub fn has_buffers(&self) -> bool {
        self.workspace.is_some()
    }

    /// Build and cache the transform plan if it does not exist yet
    pub fn warm_plan(&mut self) -> Arc<dyn Fft<f32>> {
        if let Some(plan) = &self.plan {
            return Arc::clone(plan);
        }
        tracing::debug!(size = self.window_len, "Building transform plan");
        let plan = FftPlanner::<f32>::new().plan_fft_forward(self.window_len);
        self.plan = Some(Arc::clone(&plan));
        plan
    }

    /// Allocate the transform input buffer
    ///
    /// # Errors
    /// [`EngineError::ResourceExhausted`] if the allocation fails.
    pub fn allocate_buffers(&mut self) -> Result<(), EngineError> {
        if self.workspace.is_none() {
            self.workspace = Some(Workspace {
                buffer: try_alloc(self.window_len)?,
                scratch: Vec::new(),
            });
        }
        Ok(())
    }

    /// Free the transform buffers; the plan stays cached
    pub fn release_buffers(&mut self) {
        self.workspace = None;
    }

    /// Per-frame mean absolute loudness of `snapshot` into `out`
    pub fn amplitude(&self, snapshot: &[i16], out: &mut [f32]) -> Result<(), EngineError> {
        self.check_shape(snapshot, out)?;
        amplitude_into(snapshot, self.channels, out);
        Ok(())
    }

    /// Calibrated magnitude spectrum of `snapshot` into `out`
    pub fn spectrum(&mut self, snapshot: &[i16], out: &mut [f32]) -> Result<(), EngineError> {
        self.check_shape(snapshot, out)?;
        let plan = self.warm_plan();
        self.allocate_buffers()?;

        let workspace = match self.workspace.as_mut() {
            Some(workspace) => workspace,
            None => {
                return Err(EngineError::ResourceExhausted {
                    requested: self.window_len,
                })
            }
        };

        let scratch_len = plan.get_inplace_scratch_len();
        if workspace.scratch.len() < scratch_len {
            workspace.scratch = try_alloc(scratch_len)?;
        }

        for (slot, &sample) in workspace.buffer.iter_mut().zip(snapshot) {
            *slot = Complex::new(sample as f32, 0.0);
        }

        plan.process_with_scratch(&mut workspace.buffer, &mut workspace.scratch[..scratch_len]);

        for ((value, bin), &maximum) in out
            .iter_mut()
            .zip(&workspace.buffer)
            .zip(self.calibration.as_slice())
        {
            *value = (bin.norm() / maximum).min(1.0);
        }

        Ok(())
    }

    fn check_shape(&self, snapshot: &[i16], out: &[f32]) -> Result<(), EngineError> {
        if snapshot.len() != self.window_len {
            return Err(EngineError::SnapshotSize {
                expected: self.window_len,
                actual: snapshot.len(),
            });
        }
        if out.len() != self.bin_count() {
            return Err(EngineError::SnapshotSize {
                expected: self.bin_count(),
                actual: out.len(),
            });
        }
        Ok(())
    }
}

/// Mean absolute normalized level of the first `out.len()` interleaved frames
pub fn amplitude_into(snapshot: &[i16], channels: usize, out: &mut [f32]) {
    let scale = 1.0 / (crate::MAX_AMPLITUDE * channels as f32);
    for (value, frame) in out.iter_mut().zip(snapshot.chunks_exact(channels)) {
        let sum: f32 = frame.iter().map(|&s| (s as f32).abs()).sum();
        *value = sum * scale;
    }
}

fn try_alloc(len: usize) -> Result<Vec<Complex<f32>>, EngineError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|_| EngineError::ResourceExhausted { requested: len })?;
    buffer.resize(len, Complex::new(0.0, 0.0));
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn analyzer(window_len: usize, channels: u16, maximum: f32) -> Analyzer {
        Analyzer::new(
            window_len,
            channels,
            CalibrationTable::uniform(window_len / 2, maximum).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_amplitude_stereo_frame_mean() {
        let analyzer = analyzer(4, 2, 1.0);
        let mut out = vec![0.0; 2];
        analyzer.amplitude(&[100, -100, 0, 0], &mut out).unwrap();

        assert_abs_diff_eq!(out[0], 0.003_052, epsilon = 1e-6);
        assert_eq!(out[1], 0.0);
    }

    #[test]
    fn test_amplitude_extremes_stay_in_range() {
        let analyzer = analyzer(4, 1, 1.0);
        let mut out = vec![0.0; 2];
        analyzer
            .amplitude(&[i16::MIN, i16::MAX, 0, -1], &mut out)
            .unwrap();

        assert_eq!(out[0], 1.0);
        assert!(out[1] < 1.0 && out[1] > 0.999);
        assert!(out.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_spectrum_of_constant_is_dc_only() {
        let mut analyzer = analyzer(8, 1, 8000.0);
        let mut out = vec![0.0; 4];
        analyzer.spectrum(&[1000; 8], &mut out).unwrap();

        assert_abs_diff_eq!(out[0], 1.0, epsilon = 1e-4);
        for value in &out[1..] {
            assert_abs_diff_eq!(*value, 0.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_spectrum_locates_cosine_bin() {
        let mut analyzer = analyzer(16, 1, 8000.0);
        let snapshot: Vec<i16> = (0..16)
            .map(|n| {
                let phase = 2.0 * std::f32::consts::PI * 2.0 * n as f32 / 16.0;
                (1000.0 * phase.cos()).round() as i16
            })
            .collect();
        let mut out = vec![0.0; 8];
        analyzer.spectrum(&snapshot, &mut out).unwrap();

        assert_abs_diff_eq!(out[2], 1.0, epsilon = 1e-2);
        for (k, value) in out.iter().enumerate() {
            if k != 2 {
                assert_abs_diff_eq!(*value, 0.0, epsilon = 1e-2);
            }
        }
    }

    #[test]
    fn test_spectrum_clamps_to_one() {
        let mut analyzer = analyzer(8, 2, 1.0);
        let mut out = vec![0.0; 4];
        analyzer
            .spectrum(&[i16::MAX, i16::MIN, 300, -7, 0, 12, i16::MAX, 5], &mut out)
            .unwrap();

        assert!(out.iter().all(|v| (0.0..=1.0).contains(v)));
        assert_eq!(out[0], 1.0);
    }

    #[test]
    fn test_plan_cached_across_buffer_release() {
        let mut analyzer = analyzer(8, 1, 1.0);
        assert!(!analyzer.has_plan());

        let mut out = vec![0.0; 4];
        analyzer.spectrum(&[0; 8], &mut out).unwrap();
        assert!(analyzer.has_plan());
        assert!(analyzer.has_buffers());

        analyzer.release_buffers();
        assert!(!analyzer.has_buffers());
        assert!(analyzer.has_plan());

        analyzer.spectrum(&[0; 8], &mut out).unwrap();
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_rejects_partial_frames_and_wrong_calibration() {
        assert!(Analyzer::new(7, 2, CalibrationTable::uniform(3, 1.0).unwrap()).is_err());
        assert!(Analyzer::new(8, 0, CalibrationTable::uniform(4, 1.0).unwrap()).is_err());
        assert!(Analyzer::new(9, 1, CalibrationTable::uniform(4, 1.0).unwrap()).is_err());
        assert!(matches!(
            Analyzer::new(12, 3, CalibrationTable::uniform(6, 1.0).unwrap()),
            Err(EngineError::Config(_))
        ));
        assert_eq!(
            Analyzer::new(8, 1, CalibrationTable::uniform(8, 1.0).unwrap()).err(),
            Some(EngineError::CalibrationMismatch {
                expected: 4,
                actual: 8
            })
        );
    }

    #[test]
    fn test_mono_window_keeps_lower_half() {
        let table = CalibrationTable::uniform(4, 1.0).unwrap();
        let mut analyzer = Analyzer::new(8, 1, table).unwrap();
        assert_eq!(analyzer.bin_count(), 4);

        let mut out = vec![0.0; 4];
        analyzer
            .spectrum(&[1000, -300, 250, 4000, -2000, 17, 90, -5000], &mut out)
            .unwrap();
        assert!(out.iter().all(|v| (0.0..=1.0).contains(v)));

        let mut levels = vec![0.0; 4];
        analyzer.amplitude(&[1, 2, 3, 4, 5, 6, 7, 8], &mut levels).unwrap();
        for (level, sample) in levels.iter().zip(1..) {
            assert_abs_diff_eq!(*level, sample as f32 / crate::MAX_AMPLITUDE, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_reference_geometry() {
        let analyzer = Analyzer::new(512, 2, CalibrationTable::reference()).unwrap();
        assert_eq!(analyzer.bin_count(), 256);
        assert_eq!(analyzer.window_len(), 512);
    }

    #[test]
    fn test_wrong_snapshot_size() {
        let mut analyzer = analyzer(8, 1, 1.0);
        let mut out = vec![0.0; 4];
        assert_eq!(
            analyzer.spectrum(&[0; 4], &mut out),
            Err(EngineError::SnapshotSize {
                expected: 8,
                actual: 4
            })
        );
    }
}
