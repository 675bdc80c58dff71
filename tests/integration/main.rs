mod common;

mod cross_feature;
mod notifications;
mod presence;
mod sync;
mod system;
mod tenants;
