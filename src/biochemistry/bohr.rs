//! Bohr effect and oxygen transport metrics.
//!
//! A diagnostic layer evaluated on the running state, never integrated and
//! never fed back into the kinetics.
//!
//! P50 responds to the internal environment of the cell:
//!
//! P50 = P50_normal · exp(−0.48 ln10 (pHi − 7.4) + 0.3 ([BPG] − 5) / P50_normal)
//!
//! Saturation is a Hill curve with n = 2.7 evaluated at the extracellular pH,
//! where O2 loading happens: arterial pO2 100 mmHg at pHe, venous pO2 40 mmHg at
//! pHe − 0.05. Keep P50 on pHi and the saturation on pHe.
//!
//! References:
//! - Bohr C, Hasselbalch K, Krogh A. Skand Arch Physiol. 1904;16:402-412
//! - Benesch R, Benesch RE. Nature. 1969;221:618-622 (2,3-DPG effect)
//! - Roughton FJW, Severinghaus JW. J Appl Physiol. 1973;35:861-869 (Standard OEC)
//! - Hill AV. J Physiol. 1910;40:iv-vii

use std::f64::consts::LN_10;

use serde::{Deserialize, Serialize};

use super::enzyme::hill_kinetics;

/// pH at which P50 equals its normal value
pub const STANDARD_PH: f64 = 7.4;

/// 2,3-BPG concentration at which P50 equals its normal value (mM)
pub const STANDARD_BPG_MM: f64 = 5.0;

/// Hemoglobin and gas constants of the oxygen model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BohrConstants {
    /// P50 at pH 7.4 and 5 mM 2,3-BPG (mmHg)
    pub p50_normal_mmHg: f64,
    /// d log10(P50) / d pH
    pub bohr_coefficient: f64,
    /// 2,3-BPG effect on ln(P50), scaled by P50_normal
    pub bpg_coefficient: f64,
    pub hill_n: f64,
    /// Blood hemoglobin (g/dL)
    pub hemoglobin_g_dl: f64,
    /// Hüfner factor (mL O2 per g Hb)
    pub o2_per_g_hb: f64,
    /// Dissolved O2 (mL/dL per mmHg)
    pub o2_solubility: f64,
    pub arterial_po2_mmHg: f64,
    pub venous_po2_mmHg: f64,
    /// Venous blood is this much more acidic than pHe
    pub venous_ph_drop: f64,
    /// Bounds applied to P50 (mmHg)
    pub p50_min_mmHg: f64,
    pub p50_max_mmHg: f64,
}

impl Default for BohrConstants {
    fn default() -> Self {
        Self {
            p50_normal_mmHg: 26.8,
            bohr_coefficient: -0.48,
            bpg_coefficient: 0.3,
            hill_n: 2.7,
            hemoglobin_g_dl: 15.0,
            o2_per_g_hb: 1.34,
            o2_solubility: 0.003,
            arterial_po2_mmHg: 100.0,
            venous_po2_mmHg: 40.0,
            venous_ph_drop: 0.05,
            p50_min_mmHg: 5.0,
            p50_max_mmHg: 100.0,
        }
    }
}

impl BohrConstants {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.p50_normal_mmHg > 0.0) || !(self.hill_n > 0.0) {
            return Err(format!(
                "P50 and Hill coefficient must be positive, got {} mmHg and {}",
                self.p50_normal_mmHg, self.hill_n
            ));
        }
        if !(self.p50_min_mmHg > 0.0) || self.p50_min_mmHg >= self.p50_max_mmHg {
            return Err(format!(
                "P50 bounds must satisfy 0 < min < max, got [{}, {}]",
                self.p50_min_mmHg, self.p50_max_mmHg
            ));
        }
        if !(self.arterial_po2_mmHg > 0.0) || !(self.venous_po2_mmHg >= 0.0) {
            return Err(format!(
                "invalid pO2 pair: arterial {} mmHg, venous {} mmHg",
                self.arterial_po2_mmHg, self.venous_po2_mmHg
            ));
        }
        Ok(())
    }

    /// Hemoglobin P50 for the intracellular pH and 2,3-BPG level (mmHg)
    pub fn p50(&self, ph_i: f64, bpg_mM: f64) -> f64 {
        let exponent = self.bohr_coefficient * LN_10 * (ph_i - STANDARD_PH)
            + self.bpg_coefficient * (bpg_mM - STANDARD_BPG_MM) / self.p50_normal_mmHg;
        let p50 = self.p50_normal_mmHg * exponent.exp();
        if p50.is_finite() {
            p50.clamp(self.p50_min_mmHg, self.p50_max_mmHg)
        } else {
            self.p50_normal_mmHg
        }
    }

    /// Fractional saturation at `po2` for a given P50
    pub fn saturation(&self, po2_mmHg: f64, p50_mmHg: f64) -> f64 {
        hill_kinetics(1.0, p50_mmHg, po2_mmHg, self.hill_n).clamp(0.0, 1.0)
    }

    /// O2 content of blood (mL O2/dL)
    pub fn o2_content(&self, saturation: f64, po2_mmHg: f64) -> f64 {
        self.o2_per_g_hb * self.hemoglobin_g_dl * saturation + self.o2_solubility * po2_mmHg
    }
}

/// Oxygen transport metrics at one instant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OxygenTransport {
    pub ph_i: f64,
    pub ph_e: f64,
    pub bpg_mM: f64,
    pub p50_mmHg: f64,
    pub sat_arterial: f64,
    pub sat_venous: f64,
    /// mL O2/dL
    pub o2_content_arterial: f64,
    pub o2_content_venous: f64,
    /// Arterial minus venous content (mL O2/dL)
    pub o2_delivered: f64,
    pub extraction_fraction: f64,
}

impl OxygenTransport {
    /// Column labels in [`OxygenTransport::values`] order
    pub const LABELS: [&'static str; 10] = [
        "pHi",
        "pHe",
        "BPG_mM",
        "P50_mmHg",
        "sat_arterial",
        "sat_venous",
        "O2_content_arterial",
        "O2_content_venous",
        "O2_delivered",
        "extraction_fraction",
    ];

    pub fn values(&self) -> [f64; 10] {
        [
            self.ph_i,
            self.ph_e,
            self.bpg_mM,
            self.p50_mmHg,
            self.sat_arterial,
            self.sat_venous,
            self.o2_content_arterial,
            self.o2_content_venous,
            self.o2_delivered,
            self.extraction_fraction,
        ]
    }
}

/// Evaluate the oxygen metrics from pHi, pHe and 2,3-BPG
pub fn oxygen_transport(ph_i: f64, ph_e: f64, bpg_mM: f64, k: &BohrConstants) -> OxygenTransport {
    // Conformation follows the cytoplasm
    let p50 = k.p50(ph_i, bpg_mM);

    // Loading happens at the membrane: shift the curve by the extracellular pH
    let surface_p50 = |ph: f64| {
        let shift = k.bohr_coefficient * LN_10 * (ph - ph_i);
        (p50 * shift.exp()).clamp(k.p50_min_mmHg, k.p50_max_mmHg)
    };
    let sat_arterial = k.saturation(k.arterial_po2_mmHg, surface_p50(ph_e));
    let sat_venous = k.saturation(k.venous_po2_mmHg, surface_p50(ph_e - k.venous_ph_drop));

    let o2_content_arterial = k.o2_content(sat_arterial, k.arterial_po2_mmHg);
    let o2_content_venous = k.o2_content(sat_venous, k.venous_po2_mmHg);
    let o2_delivered = o2_content_arterial - o2_content_venous;
    let extraction_fraction = if o2_content_arterial > 0.0 {
        o2_delivered / o2_content_arterial
    } else {
        0.0
    };

    OxygenTransport {
        ph_i,
        ph_e,
        bpg_mM,
        p50_mmHg: p50,
        sat_arterial,
        sat_venous,
        o2_content_arterial,
        o2_content_venous,
        o2_delivered,
        extraction_fraction,
    }
}
