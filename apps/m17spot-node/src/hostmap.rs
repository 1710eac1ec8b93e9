//! Reflector directory. Entries come from a flat space-delimited host
//! file plus an optional personal override file (either format), keyed
//! by the base designator. `read_all` rebuilds a fresh map and swaps it
//! in atomically so readers never see a half-populated directory.

use std::collections::HashMap;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use log::{info, warn};
use m17spot_core::Callsign;
use serde::Deserialize;

pub const DEFAULT_REFLECTOR_PORT: u16 = 17000;

/// One reflector: base designator (8 chars max), its addresses and the
/// modules it serves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Host {
    pub cs: String,
    pub ipv4: Option<IpAddr>,
    pub ipv6: Option<IpAddr>,
    pub modules: String,
    pub smodules: String,
    pub port: u16,
}

impl Host {
    /// The socket address to dial, honoring the enabled IP families.
    /// IPv6 wins when both families are available.
    #[must_use]
    pub fn socket_addr(&self, has_ipv4: bool, has_ipv6: bool) -> Option<SocketAddr> {
        if has_ipv6 {
            if let Some(ip) = self.ipv6 {
                return Some(SocketAddr::new(ip, self.port));
            }
        }
        if has_ipv4 {
            if let Some(ip) = self.ipv4 {
                return Some(SocketAddr::new(ip, self.port));
            }
        }
        None
    }
}

/// Personal override entries may also arrive as JSON.
#[derive(Debug, Deserialize)]
struct JsonHost {
    designator: String,
    #[serde(default)]
    ipv4: Option<String>,
    #[serde(default)]
    ipv6: Option<String>,
    #[serde(default)]
    modules: Option<String>,
    #[serde(default)]
    port: Option<u16>,
}

pub struct HostMap {
    map: RwLock<Arc<HashMap<String, Host>>>,
    host_path: PathBuf,
    my_host_path: Option<PathBuf>,
    has_ipv4: bool,
    has_ipv6: bool,
}

impl HostMap {
    #[must_use]
    pub fn new(
        host_path: &Path,
        my_host_path: Option<&Path>,
        has_ipv4: bool,
        has_ipv6: bool,
    ) -> Self {
        Self {
            map: RwLock::new(Arc::new(HashMap::new())),
            host_path: host_path.into(),
            my_host_path: my_host_path.map(Into::into),
            has_ipv4,
            has_ipv6,
        }
    }

    /// Rebuild the directory from both files and swap it in. Errors on
    /// the override file only warn; the main file must be readable.
    pub fn read_all(&self) -> std::io::Result<usize> {
        let mut fresh = HashMap::new();
        let text = fs::read_to_string(&self.host_path)?;
        self.merge_flat(&mut fresh, &text);
        if let Some(my) = &self.my_host_path {
            match fs::read_to_string(my) {
                Ok(text) => {
                    if my.extension().is_some_and(|e| e == "json") {
                        self.merge_json(&mut fresh, &text);
                    } else {
                        self.merge_flat(&mut fresh, &text);
                    }
                }
                Err(e) => warn!("could not read {}: {e}", my.display()),
            }
        }
        fresh.retain(|cs, host| {
            let usable = host.socket_addr(self.has_ipv4, self.has_ipv6).is_some();
            if !usable {
                warn!("{cs} has no usable address, dropped");
            }
            usable
        });
        let count = fresh.len();
        info!("host map loaded, {count} reflectors");
        *self.write_lock() = Arc::new(fresh);
        Ok(count)
    }

    /// Look up the reflector a destination callsign points at, module
    /// and suffix stripped.
    #[must_use]
    pub fn find(&self, dst: &Callsign) -> Option<Host> {
        let base = base_designator(dst.text())?;
        self.snapshot().get(&base).cloned()
    }

    /// One-step lookup: the dialable address for a destination.
    #[must_use]
    pub fn resolve(&self, dst: &Callsign) -> Option<SocketAddr> {
        self.find(dst)?.socket_addr(self.has_ipv4, self.has_ipv6)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshot().len() == 0
    }

    fn snapshot(&self) -> Arc<HashMap<String, Host>> {
        match self.map.read() {
            Ok(g) => g.clone(),
            Err(e) => e.into_inner().clone(),
        }
    }

    fn write_lock(&self) -> std::sync::RwLockWriteGuard<'_, Arc<HashMap<String, Host>>> {
        match self.map.write() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        }
    }

    /// Space-delimited lines: cs ipv4 ipv6 modules smodules port, with
    /// `null` placeholders and `#` comments.
    fn merge_flat(&self, map: &mut HashMap<String, Host>, text: &str) {
        for line in text.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 6 {
                warn!("short host line ignored: {line:?}");
                continue;
            }
            let Some(cs) = base_designator(fields[0]) else {
                warn!("bad designator {:?} ignored", fields[0]);
                continue;
            };
            let Ok(port) = fields[5].parse::<u16>() else {
                warn!("bad port in host line: {line:?}");
                continue;
            };
            map.insert(
                cs.clone(),
                Host {
                    cs,
                    ipv4: parse_addr(fields[1]),
                    ipv6: parse_addr(fields[2]),
                    modules: placeholder(fields[3]),
                    smodules: placeholder(fields[4]),
                    port,
                },
            );
        }
    }

    fn merge_json(&self, map: &mut HashMap<String, Host>, text: &str) {
        let hosts: Vec<JsonHost> = match serde_json::from_str(text) {
            Ok(h) => h,
            Err(e) => {
                warn!("bad JSON host file: {e}");
                return;
            }
        };
        for h in hosts {
            let Some(cs) = base_designator(&h.designator) else {
                warn!("bad designator {:?} ignored", h.designator);
                continue;
            };
            map.insert(
                cs.clone(),
                Host {
                    cs,
                    ipv4: h.ipv4.as_deref().and_then(parse_addr),
                    ipv6: h.ipv6.as_deref().and_then(parse_addr),
                    modules: h.modules.unwrap_or_default(),
                    smodules: String::new(),
                    port: h.port.unwrap_or(DEFAULT_REFLECTOR_PORT),
                },
            );
        }
    }
}

fn parse_addr(field: &str) -> Option<IpAddr> {
    if field.eq_ignore_ascii_case("null") {
        return None;
    }
    field.parse().ok()
}

fn placeholder(field: &str) -> String {
    if field.eq_ignore_ascii_case("null") {
        String::new()
    } else {
        field.to_string()
    }
}

/// Everything up to the first space, `/` or `.`, capped at 8 chars.
/// Shorter than 3 characters cannot be a reflector designator.
#[must_use]
pub fn base_designator(text: &str) -> Option<String> {
    let end = text
        .find(|c| c == ' ' || c == '/' || c == '.')
        .unwrap_or(text.len());
    if end < 3 {
        return None;
    }
    Some(text[..end.min(8)].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("m17spot-test-{name}-{}", std::process::id()));
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    const FLAT: &str = "\
# main hosts
M17-QQQ 44.0.0.1 null ABC null 17000
M17-ZZZ null 2001:db8::1 AB A 17000
M17-BAD null null ABC null 17000  # no address at all
M17-OOPS 44.0.0.9 null ABC null notaport
";

    #[test]
    fn flat_file_load_and_prune() {
        let path = temp_file("flat", FLAT);
        let map = HostMap::new(&path, None, true, true);
        map.read_all().unwrap();
        assert_eq!(map.len(), 2);
        let qqq = map.find(&Callsign::new("M17-QQQ C")).unwrap();
        assert_eq!(qqq.ipv4.unwrap().to_string(), "44.0.0.1");
        assert_eq!(qqq.modules, "ABC");
        assert!(qqq.ipv6.is_none());
        assert!(map.find(&Callsign::new("M17-BAD")).is_none());
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn family_selection() {
        let host = Host {
            cs: "M17-ZZZ".into(),
            ipv4: Some("44.0.0.1".parse().unwrap()),
            ipv6: Some("2001:db8::1".parse().unwrap()),
            modules: "AB".into(),
            smodules: String::new(),
            port: 17000,
        };
        assert!(host.socket_addr(true, true).unwrap().is_ipv6());
        assert!(host.socket_addr(true, false).unwrap().is_ipv4());
        assert!(host.socket_addr(false, false).is_none());
    }

    #[test]
    fn ipv6_only_host_dropped_without_ipv6() {
        let path = temp_file("v4only", FLAT);
        let map = HostMap::new(&path, None, true, false);
        map.read_all().unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.find(&Callsign::new("M17-ZZZ")).is_none());
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn personal_json_overrides() {
        let main = temp_file("main", FLAT);
        let my_json = std::env::temp_dir().join(format!(
            "m17spot-test-my-{}.json",
            std::process::id()
        ));
        fs::write(
            &my_json,
            r#"[{ "designator": "M17-QQQ", "ipv4": "10.0.0.5", "port": 17001 }]"#,
        )
        .unwrap();
        let map = HostMap::new(&main, Some(&my_json), true, true);
        map.read_all().unwrap();
        let qqq = map.find(&Callsign::new("M17-QQQ")).unwrap();
        assert_eq!(qqq.ipv4.unwrap().to_string(), "10.0.0.5");
        assert_eq!(qqq.port, 17001);
        fs::remove_file(main).unwrap();
        fs::remove_file(my_json).unwrap();
    }

    #[test]
    fn base_designator_rules() {
        assert_eq!(base_designator("M17-QQQ C").as_deref(), Some("M17-QQQ"));
        assert_eq!(base_designator("URF001").as_deref(), Some("URF001"));
        assert_eq!(
            base_designator("LONGCALLSIGN").as_deref(),
            Some("LONGCALL")
        );
        assert!(base_designator("AB").is_none());
        assert!(base_designator("X/P").is_none());
    }

    #[test]
    fn reload_replaces_the_snapshot() {
        let path = temp_file("reload", FLAT);
        let map = HostMap::new(&path, None, true, true);
        map.read_all().unwrap();
        assert!(map.find(&Callsign::new("M17-QQQ")).is_some());

        fs::write(&path, "M17-NEW 44.1.1.1 null A null 17000\n").unwrap();
        map.read_all().unwrap();
        assert!(map.find(&Callsign::new("M17-QQQ")).is_none());
        assert!(map.find(&Callsign::new("M17-NEW")).is_some());
        fs::remove_file(path).unwrap();
    }
}
