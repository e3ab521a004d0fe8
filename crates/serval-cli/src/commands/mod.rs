pub(crate) mod certificate;
pub(crate) mod check;
pub(crate) mod helpers;
