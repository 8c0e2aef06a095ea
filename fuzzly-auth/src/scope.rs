//! `Scope`, per `shared/models/auth.py`: a coarse permission bucket. Higher
//! tiers imply lower ones within the user ladder (`user < mod < admin`);
//! `bot` and `internal` are disjoint singletons.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use strum::EnumIter;

#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Default = 0,
    Bot = 1,
    User = 2,
    Mod = 3,
    Admin = 4,
    Internal = 5,
}

impl Scope {
    const fn value(self) -> u8 {
        self as u8
    }

    /// All scopes `self` implicitly grants (§4.6). `bot` and `internal` are
    /// disjoint from the `user..admin` ladder and only grant themselves.
    pub fn all_included_scopes(self) -> BTreeSet<Scope> {
        let ladder = [Scope::User, Scope::Mod, Scope::Admin];
        let included: BTreeSet<Scope> = ladder
            .into_iter()
            .filter(|s| {
                Scope::User.value() <= s.value() && s.value() <= self.value()
            })
            .collect();
        if included.is_empty() {
            BTreeSet::from([self])
        } else {
            included
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Bot => "bot",
            Self::User => "user",
            Self::Mod => "mod",
            Self::Admin => "admin",
            Self::Internal => "internal",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "default" => Some(Self::Default),
            "bot" => Some(Self::Bot),
            "user" => Some(Self::User),
            "mod" => Some(Self::Mod),
            "admin" => Some(Self::Admin),
            "internal" => Some(Self::Internal),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn user_scope_includes_only_user() {
        assert_eq!(Scope::User.all_included_scopes(), BTreeSet::from([Scope::User]));
    }

    #[test]
    fn mod_scope_includes_user_and_mod() {
        assert_eq!(
            Scope::Mod.all_included_scopes(),
            BTreeSet::from([Scope::User, Scope::Mod])
        );
    }

    #[test]
    fn admin_scope_includes_whole_ladder() {
        assert_eq!(
            Scope::Admin.all_included_scopes(),
            BTreeSet::from([Scope::User, Scope::Mod, Scope::Admin])
        );
    }

    #[test]
    fn bot_and_internal_are_disjoint_singletons() {
        assert_eq!(Scope::Bot.all_included_scopes(), BTreeSet::from([Scope::Bot]));
        assert_eq!(
            Scope::Internal.all_included_scopes(),
            BTreeSet::from([Scope::Internal])
        );
    }
}
