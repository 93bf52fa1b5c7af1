pub(crate) mod analyze;
pub(crate) mod campaign;
pub(crate) mod helpers;
pub(crate) mod status;
