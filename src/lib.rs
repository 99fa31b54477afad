//! Projection of fund savings under German capital-gains tax rules
//! (Vorabpauschale, Teilfreistellung, Sparerpauschbetrag) and planning of
//! how to spread gain realization across years.

pub mod api;
pub mod core;
pub mod log;
