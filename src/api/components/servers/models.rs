use serde::{Deserialize, Deserializer};
use std::net::IpAddr;

const MAX_NAME_LEN: usize = 100;

#[derive(Deserialize, Default, Debug, Clone)]
#[serde(default)]
pub struct AddServerRequest {
    pub name: String,
    pub ip_address: String,
    pub description: Option<String>,
}

/// Absent fields stay untouched. `description: null` clears the description.
#[derive(Deserialize, Default, Debug, Clone)]
#[serde(default)]
pub struct UpdateServerRequest {
    pub name: Option<String>,
    pub ip_address: Option<String>,
    #[serde(deserialize_with = "present")]
    pub description: Option<Option<String>>,
}

/// Only runs for fields that are in the body, so an explicit `null` becomes `Some(None)`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

fn check_name(name: &str) -> Result<(), &'static str> {
    let name = name.trim();
    if name.is_empty() {
        return Err("name is required");
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err("name must be at most 100 characters");
    }
    Ok(())
}

fn check_ip(ip: &str) -> Result<(), &'static str> {
    ip.trim()
        .parse::<IpAddr>()
        .map(|_| ())
        .map_err(|_| "invalid ip!")
}

impl AddServerRequest {
    pub fn validate(&self) -> Result<(), &'static str> {
        check_name(&self.name)?;
        check_ip(&self.ip_address)
    }
}

impl UpdateServerRequest {
    pub fn validate(&self) -> Result<(), &'static str> {
        if let Some(name) = &self.name {
            check_name(name)?;
        }
        if let Some(ip) = &self.ip_address {
            check_ip(ip)?;
        }
        Ok(())
    }
}
