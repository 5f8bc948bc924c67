use portage_wire::payload::HostArgs;
use portage_wire::{ErrorKind, JobError};

/// Identity a worker is bound to.
///
/// Two jobs may share a worker only if all five fields match; a pooled
/// worker whose identity differs from the next job's target is re-identified
/// before the command is dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerIdentity {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl WorkerIdentity {
    /// Build the identity for a URL, routed to `protocol` (which may differ
    /// from the URL scheme under proxy substitution).
    pub fn from_url(protocol: &str, url: &str) -> Result<Self, JobError> {
        let parsed = url::Url::parse(url)
            .map_err(|_| JobError::new(ErrorKind::MalformedUrl, url))?;
        Ok(Self {
            protocol: protocol.to_string(),
            host: parsed.host_str().unwrap_or("").to_string(),
            port: parsed.port_or_known_default().unwrap_or(0),
            user: parsed.username().to_string(),
            password: parsed.password().unwrap_or("").to_string(),
        })
    }

    /// Wire form for `Command::SetHost`.
    pub fn to_host_args(&self) -> HostArgs {
        HostArgs {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
        }
    }
}

/// Scheme of a URL, lowercased, or MalformedUrl.
pub fn scheme_of(url: &str) -> Result<String, JobError> {
    let parsed = url::Url::parse(url)
        .map_err(|_| JobError::new(ErrorKind::MalformedUrl, url))?;
    Ok(parsed.scheme().to_ascii_lowercase())
}

/// Host of a URL, empty for host-less URLs (e.g. file:///tmp).
pub fn host_of(url: &str) -> Result<String, JobError> {
    let parsed = url::Url::parse(url)
        .map_err(|_| JobError::new(ErrorKind::MalformedUrl, url))?;
    Ok(parsed.host_str().unwrap_or("").to_string())
}

/// True for file:// URLs.
pub fn is_local(url: &str) -> bool {
    url::Url::parse(url)
        .map(|u| u.scheme().eq_ignore_ascii_case("file"))
        .unwrap_or(false)
}

/// Join a child name onto a directory URL, preserving the rest of the URL.
pub fn join_url(dir_url: &str, name: &str) -> Result<String, JobError> {
    let parsed = url::Url::parse(dir_url)
        .map_err(|_| JobError::new(ErrorKind::MalformedUrl, dir_url))?;
    let mut joined = parsed.clone();
    {
        let mut segments = joined
            .path_segments_mut()
            .map_err(|_| JobError::new(ErrorKind::MalformedUrl, dir_url))?;
        segments.pop_if_empty();
        segments.push(name);
    }
    Ok(joined.to_string())
}
