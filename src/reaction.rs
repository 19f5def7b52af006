use crate::Real;
use itertools::Itertools;
use std::fmt;
use thiserror::Error;

/// A species name together with its stoichiometric weight.
pub type StochCoeff = (String, i32);

/// Error type returned when parsing a reaction descriptor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReactionParseError {
    /// The descriptor has no `->` separating reagents from products.
    #[error("`{0}`: the descriptor must contain an arrow -> to separate reagents from products")]
    MissingArrow(String),
    /// The descriptor has more than one `->`.
    #[error("`{0}`: the descriptor must not contain more than one arrow ->")]
    MultipleArrows(String),
    /// A Michaelis–Menten descriptor with anything but a single,
    /// weight-one substrate.
    #[error("`{0}`: a Michaelis-Menten reaction needs exactly one substrate with weight 1")]
    BadMichaelisMenten(String),
}

/// How fast a reaction proceeds.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum RateLaw {
    /// Mass action: in every cell the rate is `k · Π reagentᵢ^wᵢ`.
    MassAction(Real),
    /// Michaelis–Menten saturation kinetics: `vmax · s / (km + s)` where `s`
    /// is the substrate concentration.
    MichaelisMenten {
        /// Maximum rate at substrate saturation.
        vmax: Real,
        /// Substrate concentration at which the rate is `vmax / 2`.
        km: Real,
    },
}

/// One reaction channel of the simulated system.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct Reaction {
    /// Consumed species with their weights.
    pub reagents: Vec<StochCoeff>,
    /// Produced species with their weights.
    pub products: Vec<StochCoeff>,
    /// The kinetic law driving this reaction.
    pub rate: RateLaw,
}

impl Reaction {
    /// Builds a mass-action reaction from a descriptor like `"A + 2B -> C"`.
    pub fn mass_action(descriptor: &str, k: Real) -> Result<Self, ReactionParseError> {
        let (reagents, products) = parse_reaction(descriptor)?;
        Ok(Self {
            reagents,
            products,
            rate: RateLaw::MassAction(k),
        })
    }

    /// Builds a Michaelis–Menten reaction from a descriptor like `"S -> P"`.
    ///
    /// The left-hand side must be a single species with weight 1.
    pub fn michaelis_menten(
        descriptor: &str,
        vmax: Real,
        km: Real,
    ) -> Result<Self, ReactionParseError> {
        let (reagents, products) = parse_reaction(descriptor)?;
        if reagents.len() != 1 || reagents[0].1 != 1 {
            return Err(ReactionParseError::BadMichaelisMenten(
                descriptor.to_owned(),
            ));
        }
        Ok(Self {
            reagents,
            products,
            rate: RateLaw::MichaelisMenten { vmax, km },
        })
    }
}

impl fmt::Display for Reaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = |coeffs: &[StochCoeff]| {
            coeffs
                .iter()
                .map(|(name, w)| {
                    if *w == 1 {
                        name.clone()
                    } else {
                        format!("{w}{name}")
                    }
                })
                .join(" + ")
        };
        write!(f, "{} -> {}", side(&self.reagents), side(&self.products))
    }
}

fn split_sides(descriptor: &str) -> Result<(&str, &str), ReactionParseError> {
    let Some((lhs, rhs)) = descriptor.split_once("->") else {
        return Err(ReactionParseError::MissingArrow(descriptor.to_owned()));
    };
    if rhs.contains("->") {
        return Err(ReactionParseError::MultipleArrows(descriptor.to_owned()));
    }
    Ok((lhs, rhs))
}

fn parse_coeff(term: &str) -> StochCoeff {
    let digits = term.len() - term.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    let (weight, name) = term.split_at(digits);
    let name = name.trim();
    if digits == 0 || name.is_empty() {
        // No weight prefix, or the term is all digits and the "weight" is
        // actually the name.
        (term.to_owned(), 1)
    } else {
        (name.to_owned(), weight.parse().unwrap_or(1))
    }
}

fn parse_side(side: &str) -> Vec<StochCoeff> {
    side.split('+')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .map(parse_coeff)
        .collect()
}

/// Splits a descriptor like `"A + 2B -> C"` into reagent and product lists.
///
/// Either side may be empty (`"A -> "` describes a pure sink).
pub fn parse_reaction(
    descriptor: &str,
) -> Result<(Vec<StochCoeff>, Vec<StochCoeff>), ReactionParseError> {
    let (lhs, rhs) = split_sides(descriptor)?;
    Ok((parse_side(lhs), parse_side(rhs)))
}

/// Swaps the two sides of a reaction descriptor.
pub fn reverse_reaction(descriptor: &str) -> Result<String, ReactionParseError> {
    let (lhs, rhs) = split_sides(descriptor)?;
    Ok(format!("{} -> {}", rhs.trim(), lhs.trim()))
}
