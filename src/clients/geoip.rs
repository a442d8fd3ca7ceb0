//! MaxMind geolocation resolver
//!
//! Looks peers up in a local GeoIP2/GeoLite2 city database (`.mmdb`). The
//! database is opened once at startup and is read-only afterwards.

use maxminddb::{geoip2, MaxMindDBError};
use std::net::IpAddr;
use std::path::Path;

use super::{ClientError, GeoResolver};
use crate::types::Location;

pub struct MaxMindResolver {
    reader: maxminddb::Reader<Vec<u8>>,
}

impl MaxMindResolver {
    /// Open a city database file
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let reader = maxminddb::Reader::open_readfile(path)?;
        Ok(Self { reader })
    }
}

impl GeoResolver for MaxMindResolver {
    fn resolve(&self, addr: IpAddr) -> Result<Location, ClientError> {
        let city: geoip2::City = self.reader.lookup(addr).map_err(|e| match e {
            MaxMindDBError::AddressNotFoundError(_) => ClientError::NotFound(addr.to_string()),
            other => ClientError::Malformed(other.to_string()),
        })?;

        // An entry without coordinates is as good as no entry: the record
        // cannot be placed on the map.
        let location = city
            .location
            .as_ref()
            .and_then(|l| Some((l.latitude?, l.longitude?)))
            .ok_or_else(|| ClientError::NotFound(addr.to_string()))?;

        let name = english_name(&city.city.as_ref().and_then(|c| c.names.as_ref()))
            .or_else(|| english_name(&city.country.as_ref().and_then(|c| c.names.as_ref())))
            .unwrap_or_default();

        Ok(Location {
            lat: location.0,
            lon: location.1,
            name,
        })
    }
}

fn english_name(
    names: &Option<&std::collections::BTreeMap<&str, &str>>,
) -> Option<String> {
    names.and_then(|m| m.get("en")).map(|s| s.to_string())
}
