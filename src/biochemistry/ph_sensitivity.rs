//! Enzyme pH-sensitivity table.
//!
//! Activity of a pH-sensitive enzyme is scaled by a Hill titration curve
//! normalized to the resting intracellular pH:
//!
//! f(pH) = h(pH) / h(7.2),  h(pH) = 1 / (1 + 10^(n (pH_opt - pH)))
//!
//! The pH is clipped to the entry's valid range before evaluation and the
//! factor is clipped to `[0, activity_clip]`.
//!
//! References:
//! - Tomoda A et al. J Biol Chem. 1977;252:6446 (PFK pH dependence)
//! - Minakami S, Yoshikawa H. J Biochem. 1966;59:145-150 (RBC glycolysis vs pH)
//! - Rapoport TA et al. Eur J Biochem. 1976;69:571-584

use crate::biochemistry::enzyme::ph_hill_response;
use crate::network::Network;

/// pH at which every factor equals 1
pub const REFERENCE_PH: f64 = 7.2;

/// Upper bound on the activity factor (multiple of baseline activity)
pub const DEFAULT_ACTIVITY_CLIP: f64 = 3.0;

/// Physiological pH band used for entries without their own range
pub const DEFAULT_PH_RANGE: (f64, f64) = (6.5, 8.0);

/// pH response of one enzyme
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhSensitivity {
    /// Reaction name in the network
    pub enzyme: &'static str,
    /// Midpoint of the titration curve
    pub ph_opt: f64,
    /// Steepness of the titration curve
    pub n_hill: f64,
    /// pH is clipped to this range before evaluation
    pub ph_range: (f64, f64),
    /// Inverted curve: activity rises as pH falls
    pub acid_activated: bool,
}

const fn entry(enzyme: &'static str, ph_opt: f64, n_hill: f64, ph_range: (f64, f64)) -> PhSensitivity {
    PhSensitivity {
        enzyme,
        ph_opt,
        n_hill,
        ph_range,
        acid_activated: false,
    }
}

/// Glycolytic, shunt, pentose-phosphate and glutathione enzymes
pub const CORE_ENZYMES: [PhSensitivity; 14] = [
    entry("VHK", 7.7, 2.0, (6.5, 8.5)),
    // Most pH-sensitive glycolytic enzyme
    entry("VPFK", 7.1, 4.0, (6.5, 7.8)),
    entry("VPK", 7.3, 2.5, (6.5, 8.0)),
    entry("VLDH", 7.5, 2.0, (6.8, 8.0)),
    entry("VGAPDH", 8.2, 2.0, (6.8, 8.5)),
    entry("VDPGM", 7.4, 3.0, (6.8, 7.8)),
    entry("V23DPGP", 7.1, 2.0, (6.5, 7.8)),
    entry("VG6PDH", 8.0, 2.0, (6.8, 8.5)),
    entry("V6PGD", 8.0, 2.0, (6.8, 8.5)),
    entry("VGSR", 7.4, 2.0, (6.5, 8.0)),
    entry("VGSS", 7.5, 2.0, (6.8, 8.0)),
    entry("VGPX", 7.4, 2.0, (6.5, 8.0)),
    entry("VPGK", 7.4, 2.0, (6.5, 8.0)),
    entry("VENOPGM", 7.4, 2.0, (6.5, 8.0)),
];

/// Amino-acid, nucleotide and non-oxidative pentose-phosphate enzymes
pub const EXTENDED_ENZYMES: [PhSensitivity; 12] = [
    entry("VGLNS", 7.4, 2.0, DEFAULT_PH_RANGE),
    entry("VGDH", 8.0, 2.5, DEFAULT_PH_RANGE),
    entry("VASPTA", 7.8, 2.2, DEFAULT_PH_RANGE),
    entry("VALATA", 7.6, 2.0, DEFAULT_PH_RANGE),
    entry("VAPRT", 7.2, 2.5, DEFAULT_PH_RANGE),
    entry("VADA", 7.0, 3.0, DEFAULT_PH_RANGE),
    entry("VHGPRT1", 7.4, 2.3, DEFAULT_PH_RANGE),
    entry("VHGPRT2", 7.4, 2.3, DEFAULT_PH_RANGE),
    entry("VGMPS", 7.5, 2.2, DEFAULT_PH_RANGE),
    entry("VTKL1", 7.8, 2.4, DEFAULT_PH_RANGE),
    entry("VTKL2", 7.8, 2.4, DEFAULT_PH_RANGE),
    entry("VTAL", 7.6, 2.2, DEFAULT_PH_RANGE),
];

impl PhSensitivity {
    /// Normalized activity factor at `ph`, clipped to `[0, clip]`
    pub fn activity(&self, ph: f64, clip: f64) -> f64 {
        let (lo, hi) = self.ph_range;
        let ph = ph.clamp(lo, hi);
        let (ph, reference) = if self.acid_activated {
            // Mirror around the midpoint so the curve rises toward acid
            (2.0 * self.ph_opt - ph, 2.0 * self.ph_opt - REFERENCE_PH)
        } else {
            (ph, REFERENCE_PH)
        };
        let h = ph_hill_response(ph, self.ph_opt, self.n_hill);
        let h_ref = ph_hill_response(reference, self.ph_opt, self.n_hill);
        if h_ref <= 0.0 {
            return 1.0;
        }
        (h / h_ref).clamp(0.0, clip)
    }
}

/// Read-only lookup from enzyme name to pH response
#[derive(Debug, Clone)]
pub struct PhSensitivityTable {
    entries: Vec<PhSensitivity>,
    /// Upper clip of the activity factor
    pub activity_clip: f64,
}

impl Default for PhSensitivityTable {
    fn default() -> Self {
        Self {
            entries: CORE_ENZYMES.iter().chain(EXTENDED_ENZYMES.iter()).copied().collect(),
            activity_clip: DEFAULT_ACTIVITY_CLIP,
        }
    }
}

impl PhSensitivityTable {
    /// Table restricted to the 14 core enzymes
    pub fn core() -> Self {
        Self {
            entries: CORE_ENZYMES.to_vec(),
            activity_clip: DEFAULT_ACTIVITY_CLIP,
        }
    }

    pub fn with_activity_clip(mut self, clip: f64) -> Self {
        self.activity_clip = clip;
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[PhSensitivity] {
        &self.entries
    }

    pub fn get(&self, enzyme: &str) -> Option<&PhSensitivity> {
        self.entries.iter().find(|e| e.enzyme == enzyme)
    }

    /// Activity factor for an enzyme; 1.0 for enzymes not in the table
    pub fn activity(&self, enzyme: &str, ph: f64) -> f64 {
        self.get(enzyme).map_or(1.0, |e| e.activity(ph, self.activity_clip))
    }

    /// Per-reaction sensitivity, in the network's reaction order
    ///
    /// Entries naming reactions absent from the network are ignored.
    pub fn bind(&self, network: &Network) -> Vec<Option<PhSensitivity>> {
        network
            .reactions()
            .iter()
            .map(|r| self.get(&r.name).copied())
            .collect()
    }
}
