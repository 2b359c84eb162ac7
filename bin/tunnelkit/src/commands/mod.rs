pub(crate) mod compile;
pub(crate) mod freshness;
pub(crate) mod keys;
