//! Closed sets of named options selected by configuration.
//!
//! Each option parses from its lowercase name and rejects anything else with
//! [`SharpError::UnsupportedOption`], so an unknown name never reaches the code
//! that builds optimizers, schedulers or initializers.

use crate::error::SharpError;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::fmt;
use std::str::FromStr;

macro_rules! named_option {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            /// Option kind reported in [`SharpError::UnsupportedOption`].
            pub const KIND: &'static str = $kind;

            /// Every accepted value, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = SharpError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    other => Err(SharpError::unsupported($kind, other)),
                }
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let text = String::deserialize(deserializer)?;
                text.parse().map_err(|_| {
                    de::Error::invalid_value(de::Unexpected::Str(text.trim()), &$kind)
                })
            }
        }
    };
}

/// The option kind whose deserializer expects `expected`, if any.
///
/// Lets config loaders turn a serde `invalid_value` back into
/// [`SharpError::UnsupportedOption`].
pub fn option_kind(expected: &str) -> Option<&'static str> {
    [InitMethod::KIND, OptimizerKind::KIND, LrPolicy::KIND, Phase::KIND]
        .into_iter()
        .find(|kind| *kind == expected)
}

named_option! {
    /// Weight initialization method.
    InitMethod, "initialization method" {
        Normal => "normal",
        Uniform => "uniform",
        #[default]
        XavierNormal => "xavier_normal",
        XavierUniform => "xavier_uniform",
        KaimingNormal => "kaiming_normal",
        KaimingUniform => "kaiming_uniform",
        Orthogonal => "orthogonal",
        Sparse => "sparse",
    }
}

named_option! {
    /// Optimization algorithm.
    OptimizerKind, "optimizer" {
        #[default]
        Adam => "adam",
    }
}

named_option! {
    /// Learning-rate policy.
    LrPolicy, "learning rate policy" {
        #[default]
        Lambda => "lambda",
        Step => "step",
        MultiStep => "multistep",
        Exp => "exp",
        Plateau => "plateau",
    }
}

named_option! {
    /// Process phase of a run.
    Phase, "phase" {
        #[default]
        Train => "train",
        Val => "val",
        Test => "test",
    }
}
