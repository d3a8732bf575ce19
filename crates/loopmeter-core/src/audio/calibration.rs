//! Per-bin normalization constants for spectrum snapshots
//!
//! Each frequency bin is divided by the largest magnitude observed for that
//! bin on typical program material, so a loud track lands near 1.0 across
//! the whole spectrum instead of being dominated by the bass bins.

use crate::audio::engine::EngineError;

/// Observed maximum magnitude per bin for a 512-sample stereo S16 window.
const REFERENCE_MAXIMA: [f32; 256] = [
    12317168.0, 7693595.0, 5863615.0, 4082974.0, 5836037.0, 4550263.0, 3377914.0, 3085778.0,
    3636534.0, 3751823.0, 2660548.0, 3313252.0, 2698853.0, 2186441.0, 1697466.0, 1960070.0,
    1286950.0, 1252382.0, 1313726.0, 1140443.0, 1345589.0, 1269153.0, 897605.0, 900408.0,
    892528.0, 587972.0, 662925.0, 668177.0, 686784.0, 656330.0, 1580286.0, 785491.0,
    761213.0, 730185.0, 851753.0, 927848.0, 891221.0, 634291.0, 833909.0, 646617.0,
    804409.0, 1015627.0, 671714.0, 813811.0, 689614.0, 727079.0, 853936.0, 819333.0,
    679111.0, 730295.0, 836287.0, 1602396.0, 990827.0, 773609.0, 733606.0, 638993.0,
    604530.0, 573002.0, 634570.0, 1015040.0, 679452.0, 672091.0, 880370.0, 1140558.0,
    1593324.0, 686787.0, 781368.0, 605261.0, 1190262.0, 525205.0, 393080.0, 409546.0,
    436431.0, 723744.0, 765299.0, 393927.0, 322105.0, 478074.0, 458596.0, 512763.0,
    381303.0, 671156.0, 1177206.0, 476813.0, 366285.0, 436008.0, 361763.0, 252316.0,
    204433.0, 291331.0, 296950.0, 329226.0, 319209.0, 258334.0, 388701.0, 543025.0,
    396709.0, 296099.0, 190213.0, 167976.0, 138928.0, 116720.0, 163538.0, 331761.0,
    133932.0, 187456.0, 530630.0, 131474.0, 84888.0, 82081.0, 122379.0, 82914.0,
    75510.0, 62669.0, 73492.0, 68775.0, 57121.0, 94098.0, 68262.0, 68307.0,
    48801.0, 46864.0, 61480.0, 46607.0, 45974.0, 45819.0, 45306.0, 45110.0,
    45175.0, 44969.0, 44615.0, 44440.0, 44066.0, 43600.0, 57117.0, 43332.0,
    59980.0, 55319.0, 54385.0, 81768.0, 51165.0, 54785.0, 73248.0, 52494.0,
    57252.0, 61869.0, 65900.0, 75893.0, 65152.0, 108009.0, 421578.0, 152611.0,
    135307.0, 254745.0, 132834.0, 169101.0, 137571.0, 141159.0, 142151.0, 211389.0,
    267869.0, 367730.0, 256726.0, 185238.0, 251197.0, 204304.0, 284443.0, 258223.0,
    158730.0, 228565.0, 375950.0, 294535.0, 288708.0, 351054.0, 694353.0, 477275.0,
    270576.0, 426544.0, 362456.0, 441219.0, 313264.0, 300050.0, 421051.0, 414769.0,
    244296.0, 292822.0, 262203.0, 418025.0, 579471.0, 418584.0, 419449.0, 405345.0,
    739170.0, 488163.0, 376361.0, 339649.0, 313814.0, 430849.0, 275287.0, 382918.0,
    297214.0, 286238.0, 367684.0, 303578.0, 516246.0, 654782.0, 353370.0, 417745.0,
    392892.0, 418934.0, 475608.0, 284765.0, 260639.0, 288961.0, 301438.0, 301305.0,
    329190.0, 252484.0, 272364.0, 261562.0, 208419.0, 203045.0, 229716.0, 191240.0,
    328251.0, 267655.0, 322116.0, 509542.0, 498288.0, 341654.0, 346341.0, 451042.0,
    452194.0, 467716.0, 447635.0, 644331.0, 1231811.0, 1181923.0, 1043922.0, 681166.0,
    1078456.0, 1088757.0, 1221378.0, 1358397.0, 1817252.0, 1255182.0, 1410357.0, 2264454.0,
    1880361.0, 1630934.0, 1147988.0, 1919954.0, 1624734.0, 1373554.0, 1865118.0, 2431931.0,
];

/// Ordered table of positive normalization constants, one per output bin
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationTable {
    maxima: Vec<f32>,
}

impl CalibrationTable {
    /// Build a table from explicit constants
    ///
    /// Every constant must be finite and strictly positive.
    pub fn new(maxima: Vec<f32>) -> Result<Self, EngineError> {
        if maxima.is_empty() {
            return Err(EngineError::Config("calibration table is empty".into()));
        }
        if let Some((bin, value)) = maxima
            .iter()
            .enumerate()
            .find(|(_, v)| !v.is_finite() || **v <= 0.0)
        {
            return Err(EngineError::Config(format!(
                "calibration bin {} has invalid maximum {}",
                bin, value
            )));
        }
        Ok(Self { maxima })
    }

    /// Table for the reference configuration (512 samples, 2 channels)
    pub fn reference() -> Self {
        Self {
            maxima: REFERENCE_MAXIMA.to_vec(),
        }
    }

    /// Bin count of the reference table
    pub fn reference_len() -> usize {
        REFERENCE_MAXIMA.len()
    }

    /// Table with the same constant in every bin
    pub fn uniform(len: usize, maximum: f32) -> Result<Self, EngineError> {
        Self::new(vec![maximum; len])
    }

    /// Number of bins
    pub fn len(&self) -> usize {
        self.maxima.len()
    }

    /// Whether the table has no bins
    pub fn is_empty(&self) -> bool {
        self.maxima.is_empty()
    }

    /// Normalization constant for a bin
    pub fn get(&self, bin: usize) -> Option<f32> {
        self.maxima.get(bin).copied()
    }

    /// All constants in bin order
    pub fn as_slice(&self) -> &[f32] {
        &self.maxima
    }

    /// Check the table against the bin count the analyzer produces
    pub fn check_len(&self, expected: usize) -> Result<(), EngineError> {
        if self.maxima.len() != expected {
            return Err(EngineError::CalibrationMismatch {
                expected,
                actual: self.maxima.len(),
            });
        }
        Ok(())
    }
}
