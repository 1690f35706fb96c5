pub(crate) mod diff;
pub(crate) mod fetch;
pub(crate) mod publish;
pub(crate) mod release;
pub(crate) mod resolve;
