mod entry;
mod labels;
mod tenant;

pub use self::{
    entry::Entry,
    labels::{Fingerprint, LabelSet},
    tenant::{ResourceError, ResourceResult, TenantName},
};
