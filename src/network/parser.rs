//! Text format for reaction network descriptions.
//!
//! ```text
//! -METINT
//! GLC G6P ATP ADP
//! -METEXT
//! EGLC
//! -ENZIRREV
//! VHK VEGLC
//! -CAT
//! VEGLC : EGLC => GLC .
//! VHK   : GLC + ATP => G6P + ADP .
//! -KIN
//! VEGLC = 1.077 * EGLC:49.484
//! VHK   = 0.267 * GLC:49.86 * ATP:0.57
//! -LAW
//! G6P blend
//! -INIT
//! EGLC 5.0
//! ```
//!
//! Sections may repeat and appear in any order. `#` starts a comment. The
//! parser only tokenizes; name resolution and consistency checks happen in
//! [`build`].

use std::collections::{HashMap, HashSet};

use crate::biochemistry::enzyme::ReactionStoichiometry;
use crate::error::MalformedNetworkError;

use super::flux_law::{FluxLaw, RedoxCoupling, SubFlux};
use super::rate_law::{RateLaw, SaturationTerm};
use super::{Compartment, Metabolite, Network, Reaction, DEFAULT_INITIAL_MM};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Header,
    ReversibleEnzymes,
    IrreversibleEnzymes,
    InternalMetabolites,
    ExternalMetabolites,
    Catalog,
    Kinetics,
    Laws,
    Initial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arrow {
    Reversible,
    Forward,
    Backward,
}

impl Arrow {
    fn written(&self) -> &'static str {
        match self {
            Arrow::Reversible => "reversible ('=')",
            Arrow::Forward => "irreversible ('=>')",
            Arrow::Backward => "irreversible ('<=')",
        }
    }
}

#[derive(Debug, Clone)]
struct RawEquation {
    line: usize,
    name: String,
    arrow: Arrow,
    lhs: Vec<(f64, String)>,
    rhs: Vec<(f64, String)>,
}

#[derive(Debug, Clone)]
struct RawTerm {
    numerator: String,
    denominator: Option<String>,
    km: f64,
}

#[derive(Debug, Clone)]
enum RawRate {
    Saturating { vmax: f64, terms: Vec<RawTerm> },
    Exchange { vmax: f64, inside: RawTerm, outside: RawTerm },
}

#[derive(Debug, Clone)]
struct RawRateLine {
    line: usize,
    name: String,
    rate: RawRate,
}

#[derive(Debug, Clone)]
struct RawLaw {
    line: usize,
    metabolite: String,
    tokens: Vec<String>,
    rest: String,
}

#[derive(Debug, Default)]
struct RawNetwork {
    internal: Vec<(usize, String)>,
    external: Vec<(usize, String)>,
    reversible: Vec<(usize, String)>,
    irreversible: Vec<(usize, String)>,
    equations: Vec<RawEquation>,
    rates: Vec<RawRateLine>,
    laws: Vec<RawLaw>,
    initial: Vec<(usize, String, f64)>,
}

fn syntax(line: usize, message: impl Into<String>) -> MalformedNetworkError {
    MalformedNetworkError::Syntax { line, message: message.into() }
}

fn parse_number(line: usize, token: &str, what: &str) -> Result<f64, MalformedNetworkError> {
    let value: f64 = token
        .trim()
        .parse()
        .map_err(|_| syntax(line, format!("expected {} but found '{}'", what, token.trim())))?;
    if !value.is_finite() {
        return Err(syntax(line, format!("{} must be finite, found '{}'", what, token.trim())));
    }
    Ok(value)
}

// ============================================================================
// Tokenizing
// ============================================================================

fn tokenize(text: &str) -> Result<RawNetwork, MalformedNetworkError> {
    let mut raw = RawNetwork::default();
    let mut section = Section::Header;

    for (i, full_line) in text.lines().enumerate() {
        let line_no = i + 1;
        let line = full_line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        if let Some(header) = line.strip_prefix('-') {
            section = match header.trim().to_ascii_uppercase().as_str() {
                "ENZREV" => Section::ReversibleEnzymes,
                "ENZIRREV" => Section::IrreversibleEnzymes,
                "METINT" => Section::InternalMetabolites,
                "METEXT" => Section::ExternalMetabolites,
                "CAT" => Section::Catalog,
                "KIN" => Section::Kinetics,
                "LAW" => Section::Laws,
                "INIT" => Section::Initial,
                other => return Err(syntax(line_no, format!("unknown section '-{}'", other))),
            };
            continue;
        }

        let names = || line.split_whitespace().map(|t| (line_no, t.to_string()));
        match section {
            Section::Header => {
                return Err(syntax(line_no, "content before the first section header"));
            }
            Section::ReversibleEnzymes => raw.reversible.extend(names()),
            Section::IrreversibleEnzymes => raw.irreversible.extend(names()),
            Section::InternalMetabolites => raw.internal.extend(names()),
            Section::ExternalMetabolites => raw.external.extend(names()),
            Section::Catalog => raw.equations.push(parse_equation(line_no, line)?),
            Section::Kinetics => raw.rates.push(parse_rate(line_no, line)?),
            Section::Laws => raw.laws.push(parse_law_line(line_no, line)?),
            Section::Initial => {
                let tokens: Vec<&str> = line.split_whitespace().collect();
                if tokens.len() % 2 != 0 {
                    return Err(syntax(line_no, "initial conditions are 'NAME value' pairs"));
                }
                for pair in tokens.chunks(2) {
                    let value = parse_number(line_no, pair[1], "initial concentration")?;
                    raw.initial.push((line_no, pair[0].to_string(), value));
                }
            }
        }
    }

    if raw.equations.is_empty() {
        return Err(syntax(0, "-CAT section empty or missing"));
    }
    Ok(raw)
}

fn parse_side(line: usize, side: &str) -> Result<Vec<(f64, String)>, MalformedNetworkError> {
    let side = side.trim();
    if side.is_empty() {
        return Ok(Vec::new());
    }
    side.split('+')
        .map(|species| {
            let tokens: Vec<&str> = species.split_whitespace().collect();
            match tokens.as_slice() {
                [name] => Ok((1.0, name.to_string())),
                [coeff, name] => {
                    let c = parse_number(line, coeff, "stoichiometric coefficient")?;
                    if c <= 0.0 {
                        return Err(syntax(line, format!("coefficient of '{}' must be positive", name)));
                    }
                    Ok((c, name.to_string()))
                }
                _ => Err(syntax(line, format!("cannot read species '{}'", species.trim()))),
            }
        })
        .collect()
}

fn parse_equation(line: usize, text: &str) -> Result<RawEquation, MalformedNetworkError> {
    let (name, equation) = text
        .split_once(':')
        .ok_or_else(|| syntax(line, format!("reaction definition without ':' in '{}'", text)))?;
    let name = name.trim();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(syntax(line, format!("invalid reaction name '{}'", name)));
    }
    let equation = equation.trim().trim_end_matches('.').trim_end_matches('\\').trim();

    let (arrow, lhs, rhs) = if let Some((l, r)) = equation.split_once("=>") {
        (Arrow::Forward, l, r)
    } else if let Some((l, r)) = equation.split_once("<=") {
        (Arrow::Backward, l, r)
    } else if let Some((l, r)) = equation.split_once("==") {
        (Arrow::Reversible, l, r)
    } else if let Some((l, r)) = equation.split_once('=') {
        (Arrow::Reversible, l, r)
    } else {
        return Err(syntax(line, format!("no '=' in reaction '{}'", name)));
    };
    if rhs.contains('=') {
        return Err(syntax(line, format!("multiple arrows in reaction '{}'", name)));
    }

    let mut lhs = parse_side(line, lhs)?;
    let mut rhs = parse_side(line, rhs)?;
    if arrow == Arrow::Backward {
        std::mem::swap(&mut lhs, &mut rhs);
    }
    Ok(RawEquation { line, name: name.to_string(), arrow, lhs, rhs })
}

fn parse_term(line: usize, text: &str) -> Result<RawTerm, MalformedNetworkError> {
    let (species, km) = text
        .trim()
        .rsplit_once(':')
        .ok_or_else(|| syntax(line, format!("saturation term '{}' needs 'NAME:km'", text.trim())))?;
    let km = parse_number(line, km, "Km")?;
    let (numerator, denominator) = match species.split_once('/') {
        Some((n, d)) => (n.trim().to_string(), Some(d.trim().to_string())),
        None => (species.trim().to_string(), None),
    };
    if numerator.is_empty() {
        return Err(syntax(line, format!("empty species in term '{}'", text.trim())));
    }
    Ok(RawTerm { numerator, denominator, km })
}

fn parse_rate(line: usize, text: &str) -> Result<RawRateLine, MalformedNetworkError> {
    let (name, expr) = text
        .split_once('=')
        .ok_or_else(|| syntax(line, format!("rate law without '=' in '{}'", text)))?;
    let name = name.trim().to_string();
    let expr = expr.trim();

    let (vmax_text, rest) = match expr.split_once('*') {
        Some((v, r)) => (v, r.trim()),
        None => (expr, ""),
    };
    let vmax = parse_number(line, vmax_text, "Vmax")?;

    let rate = if let Some(inner) = rest.strip_prefix('(') {
        let inner = inner
            .strip_suffix(')')
            .ok_or_else(|| syntax(line, "unclosed '(' in exchange rate law"))?;
        let (inside, outside) = inner
            .split_once(" - ")
            .ok_or_else(|| syntax(line, "exchange rate law must read '(IN:km - OUT:km)'"))?;
        RawRate::Exchange {
            vmax,
            inside: parse_term(line, inside)?,
            outside: parse_term(line, outside)?,
        }
    } else {
        let terms = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split('*').map(|t| parse_term(line, t)).collect::<Result<Vec<_>, _>>()?
        };
        RawRate::Saturating { vmax, terms }
    };
    Ok(RawRateLine { line, name, rate })
}

fn parse_law_line(line: usize, text: &str) -> Result<RawLaw, MalformedNetworkError> {
    let mut parts = text.splitn(2, char::is_whitespace);
    let metabolite = parts.next().unwrap_or("").to_string();
    let rest = parts.next().unwrap_or("").trim().to_string();
    if rest.is_empty() {
        return Err(syntax(line, format!("flux law for '{}' has no family", metabolite)));
    }
    let tokens = rest.split_whitespace().map(str::to_string).collect();
    Ok(RawLaw { line, metabolite, tokens, rest })
}

// ============================================================================
// Name resolution and validation
// ============================================================================

struct Resolver<'a> {
    index: &'a HashMap<String, usize>,
}

impl Resolver<'_> {
    fn metabolite(&self, line: usize, name: &str, context: &str) -> Result<usize, MalformedNetworkError> {
        self.index.get(name).copied().ok_or_else(|| MalformedNetworkError::UndefinedMetabolite {
            line,
            name: name.to_string(),
            context: context.to_string(),
        })
    }

    fn term(&self, line: usize, term: &RawTerm, context: &str) -> Result<SaturationTerm, MalformedNetworkError> {
        if term.km <= 0.0 {
            return Err(MalformedNetworkError::InvalidParameter {
                name: format!("km_{}", term.numerator),
                value: term.km,
                message: format!("Km in {} must be positive", context),
            });
        }
        let numerator = self.metabolite(line, &term.numerator, context)?;
        let denominator = match &term.denominator {
            Some(d) => Some(self.metabolite(line, d, context)?),
            None => None,
        };
        Ok(SaturationTerm { numerator, denominator, km: term.km })
    }

    fn sub_flux(&self, line: usize, metabolite: &str, text: &str) -> Result<SubFlux, MalformedNetworkError> {
        let invalid = |message: String| MalformedNetworkError::InvalidFluxLaw {
            line,
            metabolite: metabolite.to_string(),
            message,
        };
        let tokens: Vec<&str> = text.split_whitespace().collect();
        match tokens.as_slice() {
            ["kinetic"] => Ok(SubFlux::Kinetic),
            ["scaled", f] => Ok(SubFlux::Scaled { factor: parse_number(line, f, "scale factor")? }),
            ["relax", target, rate] => {
                let target_mM = parse_number(line, target, "relaxation target")?;
                let rate_per_h = parse_number(line, rate, "relaxation rate")?;
                if target_mM < 0.0 || rate_per_h < 0.0 {
                    return Err(invalid("relaxation target and rate must be non-negative".into()));
                }
                Ok(SubFlux::Relaxation { target_mM, rate_per_h })
            }
            _ => Err(invalid(format!(
                "unknown sub-flux '{}' (expected 'kinetic', 'scaled f' or 'relax target rate')",
                text.trim()
            ))),
        }
    }

    fn flux_law(&self, law: &RawLaw, own_index: usize) -> Result<FluxLaw, MalformedNetworkError> {
        let line = law.line;
        let metabolite = law.metabolite.as_str();
        let invalid = |message: String| MalformedNetworkError::InvalidFluxLaw {
            line,
            metabolite: metabolite.to_string(),
            message,
        };
        let kind = law.tokens[0].as_str();
        let args = &law.tokens[1..];
        let after_kind = law.rest[kind.len()..].trim();

        match kind {
            "kinetic" | "blend" | "direct" if !args.is_empty() => {
                Err(invalid(format!("'{}' takes no arguments", kind)))
            }
            "kinetic" => Ok(FluxLaw::Kinetic),
            "blend" => Ok(FluxLaw::CurveFitBlend),
            "direct" => Ok(FluxLaw::DirectFit),
            "conserve" => {
                if args.is_empty() {
                    return Err(invalid("conservation pool lists no metabolites".into()));
                }
                let mut pool = Vec::with_capacity(args.len());
                for name in args {
                    let idx = self.metabolite(line, name, "conservation pool")?;
                    if idx == own_index {
                        return Err(invalid("conservation pool refers to the conserved metabolite itself".into()));
                    }
                    if pool.contains(&idx) {
                        return Err(invalid(format!("'{}' listed twice in conservation pool", name)));
                    }
                    pool.push(idx);
                }
                Ok(FluxLaw::Conservation { pool })
            }
            "switch" => {
                let (threshold, forms) = after_kind
                    .split_once(char::is_whitespace)
                    .ok_or_else(|| invalid("switch needs '<t_h> <sub> | <sub>'".into()))?;
                let threshold_h = parse_number(line, threshold, "switch time")?;
                if threshold_h < 0.0 {
                    return Err(invalid(format!("switch time {} h is negative", threshold_h)));
                }
                let (before, after) = forms
                    .split_once('|')
                    .ok_or_else(|| invalid("switch needs two sub-fluxes separated by '|'".into()))?;
                Ok(FluxLaw::TimeSwitch {
                    threshold_h,
                    before: self.sub_flux(line, metabolite, before)?,
                    after: self.sub_flux(line, metabolite, after)?,
                })
            }
            "hybrid" => {
                let parts: Vec<&str> = after_kind.split('+').collect();
                if parts.len() != 2 {
                    return Err(invalid("hybrid needs '<w1> <sub> + <w2> <sub>'".into()));
                }
                let mut weighted = Vec::with_capacity(2);
                for part in parts {
                    let (w, sub) = part
                        .trim()
                        .split_once(char::is_whitespace)
                        .ok_or_else(|| invalid(format!("cannot read weighted sub-flux '{}'", part.trim())))?;
                    weighted.push((parse_number(line, w, "hybrid weight")?, self.sub_flux(line, metabolite, sub)?));
                }
                let second = weighted.pop().ok_or_else(|| invalid("missing second sub-flux".into()))?;
                let first = weighted.pop().ok_or_else(|| invalid("missing first sub-flux".into()))?;
                Ok(FluxLaw::WeightedHybrid { first, second })
            }
            "redox" => {
                if args.len() != 4 {
                    return Err(invalid("redox needs '<pH_opt> <n_hill> OX/RED:km <weight>'".into()));
                }
                let ph_opt = parse_number(line, &args[0], "redox pH optimum")?;
                let n_hill = parse_number(line, &args[1], "redox Hill coefficient")?;
                let term = parse_term(line, &args[2])?;
                let weight = parse_number(line, &args[3], "redox weight")?;
                let reduced_name = term
                    .denominator
                    .as_deref()
                    .ok_or_else(|| invalid("redox coupling needs a cofactor ratio 'OX/RED:km'".into()))?;
                if !(0.0..=1.0).contains(&weight) {
                    return Err(invalid(format!("redox weight {} outside [0, 1]", weight)));
                }
                if term.km <= 0.0 || n_hill <= 0.0 {
                    return Err(invalid("redox Km and Hill coefficient must be positive".into()));
                }
                Ok(FluxLaw::EnhancedRedox(RedoxCoupling {
                    ph_opt,
                    n_hill,
                    oxidized: self.metabolite(line, &term.numerator, "redox coupling")?,
                    reduced: self.metabolite(line, reduced_name, "redox coupling")?,
                    km_ratio: term.km,
                    weight,
                }))
            }
            other => Err(invalid(format!("unknown flux-law family '{}'", other))),
        }
    }
}

fn check_unique(entries: &[(usize, String)], seen: &mut HashSet<String>) -> Result<(), MalformedNetworkError> {
    for (line, name) in entries {
        if !seen.insert(name.clone()) {
            return Err(MalformedNetworkError::Duplicate { line: *line, name: name.clone() });
        }
    }
    Ok(())
}

/// Parse and validate a network description
pub fn build(text: &str) -> Result<Network, MalformedNetworkError> {
    let raw = tokenize(text)?;

    // Metabolites: internal first, then external
    let mut seen = HashSet::new();
    check_unique(&raw.internal, &mut seen)?;
    check_unique(&raw.external, &mut seen)?;
    let mut metabolites: Vec<Metabolite> = raw
        .internal
        .iter()
        .map(|(_, n)| Metabolite::new(n, Compartment::Internal))
        .chain(raw.external.iter().map(|(_, n)| Metabolite::new(n, Compartment::External)))
        .collect();
    let metabolite_index: HashMap<String, usize> =
        metabolites.iter().enumerate().map(|(i, m)| (m.name.clone(), i)).collect();
    let resolver = Resolver { index: &metabolite_index };

    // Reaction declarations
    let mut declared = HashSet::new();
    check_unique(&raw.irreversible, &mut declared)?;
    check_unique(&raw.reversible, &mut declared)?;
    let reversible: HashSet<&str> = raw.reversible.iter().map(|(_, n)| n.as_str()).collect();

    let mut rate_lines: HashMap<&str, &RawRateLine> = HashMap::new();
    for rate in &raw.rates {
        if !declared.contains(&rate.name) {
            return Err(MalformedNetworkError::UndefinedReaction {
                name: rate.name.clone(),
                problem: format!("given a rate law on line {} but never declared", rate.line),
            });
        }
        if rate_lines.insert(rate.name.as_str(), rate).is_some() {
            return Err(MalformedNetworkError::Duplicate { line: rate.line, name: rate.name.clone() });
        }
    }

    let mut reactions = Vec::with_capacity(raw.equations.len());
    let mut written = HashSet::new();
    for eq in &raw.equations {
        if !declared.contains(&eq.name) {
            return Err(MalformedNetworkError::UndefinedReaction {
                name: eq.name.clone(),
                problem: format!("used in -CAT on line {} but not declared in -ENZREV or -ENZIRREV", eq.line),
            });
        }
        if !written.insert(eq.name.clone()) {
            return Err(MalformedNetworkError::Duplicate { line: eq.line, name: eq.name.clone() });
        }

        let is_reversible = reversible.contains(eq.name.as_str());
        let arrow_reversible = eq.arrow == Arrow::Reversible;
        if is_reversible != arrow_reversible {
            return Err(MalformedNetworkError::ReversibilityConflict {
                line: eq.line,
                name: eq.name.clone(),
                declared: if is_reversible { "reversible" } else { "irreversible" },
                written: eq.arrow.written(),
            });
        }

        let context = format!("reaction {}", eq.name);
        let side = |species: &[(f64, String)]| -> Result<Vec<(usize, f64)>, MalformedNetworkError> {
            species
                .iter()
                .map(|(c, n)| Ok((resolver.metabolite(eq.line, n, &context)?, *c)))
                .collect()
        };
        let stoichiometry = ReactionStoichiometry::new(side(&eq.lhs)?, side(&eq.rhs)?);
        if stoichiometry.net().is_empty() {
            return Err(MalformedNetworkError::InconsistentStoichiometry {
                name: eq.name.clone(),
                message: "no net production or consumption of any metabolite".into(),
            });
        }

        let rate_line = rate_lines.get(eq.name.as_str()).ok_or_else(|| {
            MalformedNetworkError::UndefinedReaction {
                name: eq.name.clone(),
                problem: "missing a rate law in -KIN".into(),
            }
        })?;
        let rate_context = format!("rate law of {}", eq.name);
        let rate_law = match &rate_line.rate {
            RawRate::Saturating { vmax, terms } => RateLaw::Saturating {
                vmax_mM_per_h: *vmax,
                terms: terms
                    .iter()
                    .map(|t| resolver.term(rate_line.line, t, &rate_context))
                    .collect::<Result<Vec<_>, _>>()?,
            },
            RawRate::Exchange { vmax, inside, outside } => {
                if !is_reversible {
                    return Err(MalformedNetworkError::ReversibilityConflict {
                        line: rate_line.line,
                        name: eq.name.clone(),
                        declared: "irreversible",
                        written: "a bidirectional exchange law",
                    });
                }
                if inside.denominator.is_some() || outside.denominator.is_some() {
                    return Err(syntax(rate_line.line, "exchange laws take plain metabolite terms"));
                }
                RateLaw::Exchange {
                    vmax_mM_per_h: *vmax,
                    inside: resolver.term(rate_line.line, inside, &rate_context)?,
                    outside: resolver.term(rate_line.line, outside, &rate_context)?,
                }
            }
        };
        if rate_law.vmax() < 0.0 {
            return Err(MalformedNetworkError::InvalidParameter {
                name: format!("vmax_{}", eq.name),
                value: rate_law.vmax(),
                message: "Vmax must be non-negative".into(),
            });
        }

        reactions.push(Reaction {
            name: eq.name.clone(),
            reversible: is_reversible,
            stoichiometry,
            rate_law,
        });
    }

    for (line, name) in raw.irreversible.iter().chain(raw.reversible.iter()) {
        if !written.contains(name) {
            return Err(MalformedNetworkError::UndefinedReaction {
                name: name.clone(),
                problem: format!("declared on line {} but has no -CAT equation", line),
            });
        }
    }

    // Flux laws
    let mut assigned = HashSet::new();
    for law in &raw.laws {
        let idx = resolver.metabolite(law.line, &law.metabolite, "-LAW")?;
        if !assigned.insert(idx) {
            return Err(MalformedNetworkError::Duplicate { line: law.line, name: law.metabolite.clone() });
        }
        metabolites[idx].flux_law = resolver.flux_law(law, idx)?;
    }

    // Initial conditions
    for (line, name, value) in &raw.initial {
        let idx = resolver.metabolite(*line, name, "-INIT")?;
        if *value < 0.0 {
            return Err(MalformedNetworkError::InvalidParameter {
                name: name.clone(),
                value: *value,
                message: format!("negative initial concentration on line {}", line),
            });
        }
        metabolites[idx].initial_mM = *value;
    }

    Network::assemble(metabolites, reactions, metabolite_index)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL: &str = "\
-METINT
A B C
-METEXT
X
-ENZIRREV
V1 VIN
-ENZREV
V2
-CAT
VIN : X => A .
V1 : A => B
V2 : B = 2 C .
-KIN
VIN = 1.0 * X:0.5
V1 = 2.0 * A:0.1
V2 = 0.5 * (B:0.2 - C:0.2)
";

    #[test]
    fn test_parse_small_network() {
        let net = build(SMALL).expect("small network parses");
        assert_eq!(net.n_metabolites(), 4);
        assert_eq!(net.reactions().len(), 3);
        assert_eq!(net.metabolite_index("X"), Some(3));
        let v2 = &net.reactions()[net.reaction_index("V2").unwrap()];
        assert!(v2.reversible);
        assert!(v2.rate_law.is_exchange());
        assert_eq!(v2.stoichiometry.products, vec![(2, 2.0)]);
        assert_eq!(net.metabolites()[0].initial_mM, DEFAULT_INITIAL_MM);
    }

    #[test]
    fn test_backward_arrow_swaps_sides() {
        let text = SMALL.replace("V1 : A => B", "V1 : B <= A");
        let net = build(&text).expect("backward arrow parses");
        let v1 = &net.reactions()[1];
        assert_eq!(v1.stoichiometry.substrates, vec![(0, 1.0)]);
        assert_eq!(v1.stoichiometry.products, vec![(1, 1.0)]);
    }

    #[test]
    fn test_undefined_metabolite() {
        let text = SMALL.replace("V1 : A => B", "V1 : A => D");
        match build(&text) {
            Err(MalformedNetworkError::UndefinedMetabolite { name, .. }) => assert_eq!(name, "D"),
            other => panic!("expected undefined metabolite, got {:?}", other),
        }
    }

    #[test]
    fn test_irreversible_written_reversible() {
        let text = SMALL.replace("V1 : A => B", "V1 : A = B");
        assert!(matches!(
            build(&text),
            Err(MalformedNetworkError::ReversibilityConflict { declared: "irreversible", .. })
        ));
    }

    #[test]
    fn test_exchange_law_on_irreversible_reaction() {
        let text = SMALL.replace("V1 = 2.0 * A:0.1", "V1 = 2.0 * (A:0.1 - B:0.1)");
        assert!(matches!(build(&text), Err(MalformedNetworkError::ReversibilityConflict { .. })));
    }

    #[test]
    fn test_undeclared_reaction() {
        let text = SMALL.replace("V2 : B = 2 C .", "V2 : B = 2 C .\nV3 : C => A");
        assert!(matches!(build(&text), Err(MalformedNetworkError::UndefinedReaction { .. })));
    }

    #[test]
    fn test_missing_rate_law() {
        let text = SMALL.replace("V1 = 2.0 * A:0.1\n", "");
        match build(&text) {
            Err(MalformedNetworkError::UndefinedReaction { name, problem }) => {
                assert_eq!(name, "V1");
                assert!(problem.contains("-KIN"));
            }
            other => panic!("expected missing rate law, got {:?}", other),
        }
    }

    #[test]
    fn test_null_stoichiometry_rejected() {
        let text = SMALL.replace("V1 : A => B", "V1 : A => A");
        assert!(matches!(build(&text), Err(MalformedNetworkError::InconsistentStoichiometry { .. })));
    }

    #[test]
    fn test_flux_laws() {
        let text = format!(
            "{}-LAW\nA conserve B C\nB switch 4.0 kinetic | relax 5.0 0.1\nC hybrid 0.6 kinetic + 0.4 relax 1.0 0.5\n",
            SMALL
        );
        let net = build(&text).expect("flux laws parse");
        assert_eq!(net.metabolites()[0].flux_law, FluxLaw::Conservation { pool: vec![1, 2] });
        match &net.metabolites()[1].flux_law {
            FluxLaw::TimeSwitch { threshold_h, before, after } => {
                assert_eq!(*threshold_h, 4.0);
                assert_eq!(*before, SubFlux::Kinetic);
                assert_eq!(*after, SubFlux::Relaxation { target_mM: 5.0, rate_per_h: 0.1 });
            }
            other => panic!("expected switch, got {:?}", other),
        }
        match &net.metabolites()[2].flux_law {
            FluxLaw::WeightedHybrid { first, second } => {
                assert_eq!(first.0, 0.6);
                assert_eq!(second.1, SubFlux::Relaxation { target_mM: 1.0, rate_per_h: 0.5 });
            }
            other => panic!("expected hybrid, got {:?}", other),
        }
    }

    #[test]
    fn test_self_referential_conservation() {
        let text = format!("{}-LAW\nA conserve A B\n", SMALL);
        assert!(matches!(build(&text), Err(MalformedNetworkError::InvalidFluxLaw { .. })));
    }

    #[test]
    fn test_duplicate_metabolite() {
        let text = SMALL.replace("-METEXT\nX", "-METEXT\nX A");
        assert!(matches!(build(&text), Err(MalformedNetworkError::Duplicate { .. })));
    }

    #[test]
    fn test_initial_conditions() {
        let text = format!("{}-INIT\nA 0.25 X 5.0\n", SMALL);
        let net = build(&text).expect("init parses");
        assert_eq!(net.metabolites()[0].initial_mM, 0.25);
        assert_eq!(net.metabolites()[3].initial_mM, 5.0);
    }

    #[test]
    fn test_syntax_error_reports_line() {
        let text = SMALL.replace("V1 = 2.0 * A:0.1", "V1 = fast * A:0.1");
        match build(&text) {
            Err(MalformedNetworkError::Syntax { line, .. }) => assert_eq!(line, 15),
            other => panic!("expected syntax error, got {:?}", other),
        }
    }
}
