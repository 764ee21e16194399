use crate::profile::{Family, ModelProfile};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Grounded,
    Image,
    ManagedChat,
    KeyedChat,
}

/// Picks the backend for a request. Depends only on the profile and the
/// grounding flag; the managed-project bit is part of the profile.
pub fn select_kind(profile: &ModelProfile, grounded: bool) -> BackendKind {
    if grounded {
        return BackendKind::Grounded;
    }
    match (profile.family, profile.uses_managed_backend) {
        (Family::Image, _) => BackendKind::Image,
        (_, true) => BackendKind::ManagedChat,
        (_, false) => BackendKind::KeyedChat,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(family: Family, managed: bool) -> ModelProfile {
        ModelProfile {
            model_id: "m".into(),
            family,
            uses_managed_backend: managed,
        }
    }

    #[test]
    fn decision_table() {
        use BackendKind as B;
        use Family as F;
        let cases = [
            (F::Standard, false, true, B::Grounded),
            (F::Image, true, true, B::Grounded),
            (F::Image, true, false, B::Image),
            (F::Image, false, false, B::Image),
            (F::Standard, true, false, B::ManagedChat),
            (F::Legacy, true, false, B::ManagedChat),
            (F::Standard, false, false, B::KeyedChat),
            (F::Legacy, false, false, B::KeyedChat),
        ];
        for (family, managed, grounded, want) in cases {
            assert_eq!(
                select_kind(&profile(family, managed), grounded),
                want,
                "{family:?} managed={managed} grounded={grounded}"
            );
        }
    }
}
