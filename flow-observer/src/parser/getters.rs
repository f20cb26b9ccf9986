//! Lookups that enrich decoded flows with cluster metadata.
//!
//! Every getter answers `None` when it has nothing; a miss leaves the
//! corresponding flow fields empty and never fails decoding.

use crate::flow::{Endpoint, Service};
use std::net::IpAddr;
use std::sync::Arc;

pub trait EndpointGetter: Send + Sync {
    fn endpoint_by_ip(&self, ip: IpAddr) -> Option<Endpoint>;
}

pub trait IdentityGetter: Send + Sync {
    /// Labels of a security identity.
    fn labels_of(&self, identity: u32) -> Option<Vec<String>>;
}

pub trait DnsGetter: Send + Sync {
    /// Names `ip` was resolved to by the endpoint `endpoint_id`.
    fn names_of(&self, endpoint_id: u32, ip: IpAddr) -> Option<Vec<String>>;
}

pub trait IpGetter: Send + Sync {
    fn pod_of(&self, ip: IpAddr) -> Option<PodMetadata>;
}

pub trait ServiceGetter: Send + Sync {
    fn service_by_addr(&self, ip: IpAddr, port: u16) -> Option<Service>;
}

pub trait LinkGetter: Send + Sync {
    fn link_name(&self, ifindex: u32) -> Option<String>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodMetadata {
    pub namespace: String,
    pub pod_name: String,
}

/// Answers every lookup with `None`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopGetter;

impl EndpointGetter for NoopGetter {
    fn endpoint_by_ip(&self, _ip: IpAddr) -> Option<Endpoint> {
        None
    }
}

impl IdentityGetter for NoopGetter {
    fn labels_of(&self, _identity: u32) -> Option<Vec<String>> {
        None
    }
}

impl DnsGetter for NoopGetter {
    fn names_of(&self, _endpoint_id: u32, _ip: IpAddr) -> Option<Vec<String>> {
        None
    }
}

impl IpGetter for NoopGetter {
    fn pod_of(&self, _ip: IpAddr) -> Option<PodMetadata> {
        None
    }
}

impl ServiceGetter for NoopGetter {
    fn service_by_addr(&self, _ip: IpAddr, _port: u16) -> Option<Service> {
        None
    }
}

impl LinkGetter for NoopGetter {
    fn link_name(&self, _ifindex: u32) -> Option<String> {
        None
    }
}

/// The full set of getters used by [`super::L3L4Parser`].
#[derive(Clone)]
pub struct Resolvers {
    pub endpoints: Arc<dyn EndpointGetter>,
    pub identities: Arc<dyn IdentityGetter>,
    pub dns: Arc<dyn DnsGetter>,
    pub ips: Arc<dyn IpGetter>,
    pub services: Arc<dyn ServiceGetter>,
    pub links: Arc<dyn LinkGetter>,
}

impl Default for Resolvers {
    fn default() -> Self {
        let noop = Arc::new(NoopGetter);
        Self {
            endpoints: noop.clone(),
            identities: noop.clone(),
            dns: noop.clone(),
            ips: noop.clone(),
            services: noop.clone(),
            links: noop,
        }
    }
}

impl Resolvers {
    pub fn with_endpoints(mut self, getter: Arc<dyn EndpointGetter>) -> Self {
        self.endpoints = getter;
        self
    }

    pub fn with_identities(mut self, getter: Arc<dyn IdentityGetter>) -> Self {
        self.identities = getter;
        self
    }

    pub fn with_dns(mut self, getter: Arc<dyn DnsGetter>) -> Self {
        self.dns = getter;
        self
    }

    pub fn with_ips(mut self, getter: Arc<dyn IpGetter>) -> Self {
        self.ips = getter;
        self
    }

    pub fn with_services(mut self, getter: Arc<dyn ServiceGetter>) -> Self {
        self.services = getter;
        self
    }

    pub fn with_links(mut self, getter: Arc<dyn LinkGetter>) -> Self {
        self.links = getter;
        self
    }
}

impl std::fmt::Debug for Resolvers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolvers").finish_non_exhaustive()
    }
}
