use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use zbus::names::UniqueName;

use crate::error::PortalError;
use crate::ids::AppId;

enum CacheEntry {
    Resolved(AppId),
    /// Concurrent lookups for the same not-yet-resolved sender are coalesced
    /// here; every waiter is woken with the same outcome once resolution
    /// completes.
    Pending(Vec<tokio::sync::oneshot::Sender<Result<AppId, PortalError>>>),
}

/// Maps a bus-connection sender to its sandbox app-id, with a cache whose
/// lifetime is tied to the sender's name ownership on the bus.
pub struct AppIdResolver {
    connection: zbus::Connection,
    cache: Mutex<HashMap<UniqueName<'static>, CacheEntry>>,
}

impl AppIdResolver {
    pub fn new(connection: zbus::Connection) -> Arc<Self> {
        Arc::new(Self {
            connection,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Resolves `sender`'s app-id, consulting (and populating) the cache.
    /// Concurrent callers for the same unresolved sender share one
    /// in-flight lookup and observe the same result.
    pub async fn resolve(&self, sender: &UniqueName<'_>) -> Result<AppId, PortalError> {
        let sender = sender.to_owned();

        {
            let mut cache = self.cache.lock().await;
            match cache.get_mut(&sender) {
                Some(CacheEntry::Resolved(app_id)) => return Ok(app_id.clone()),
                Some(CacheEntry::Pending(waiters)) => {
                    let (tx, rx) = tokio::sync::oneshot::channel();
                    waiters.push(tx);
                    drop(cache);
                    return rx
                        .await
                        .map_err(|_| PortalError::Failed("app-id lookup cancelled".into()))?;
                }
                None => {
                    cache.insert(sender.clone(), CacheEntry::Pending(Vec::new()));
                }
            }
        }

        let result = self.lookup(&sender).await;

        let mut cache = self.cache.lock().await;
        let waiters = match result {
            Ok(ref app_id) => match cache.insert(sender.clone(), CacheEntry::Resolved(app_id.clone())) {
                Some(CacheEntry::Pending(waiters)) => waiters,
                _ => Vec::new(),
            },
            Err(_) => {
                // Don't cache a failed lookup; the next caller should retry it.
                match cache.remove(&sender) {
                    Some(CacheEntry::Pending(waiters)) => waiters,
                    _ => Vec::new(),
                }
            }
        };
        drop(cache);

        for waiter in waiters {
            let outcome = match &result {
                Ok(app_id) => Ok(app_id.clone()),
                Err(_) => Err(PortalError::Failed("app-id lookup failed".into())),
            };
            let _ = waiter.send(outcome);
        }

        result
    }

    async fn lookup(&self, sender: &UniqueName<'_>) -> Result<AppId, PortalError> {
        let dbus_proxy = zbus::fdo::DBusProxy::new(&self.connection)
            .await
            .map_err(|err| PortalError::Failed(err.to_string()))?;
        let pid = dbus_proxy
            .get_connection_unix_process_id(sender)
            .await
            .map_err(|err| PortalError::Failed(err.to_string()))?;
        Ok(app_id_from_pid(pid))
    }

    /// A `NameOwnerChanged(name, from, "")` signal: the sender has exited.
    /// Outstanding lookups for it, if any, are discarded; the cache entry is
    /// dropped so a future (impossible, but symmetrical) reuse of the
    /// well-known name re-resolves from scratch.
    pub async fn on_name_vanished(&self, name: &UniqueName<'_>) {
        let mut cache = self.cache.lock().await;
        cache.remove(&name.to_owned());
    }
}

/// Reads `/proc/<pid>/cgroup`, finds the `1:name=systemd:` line, and checks
/// whether its last path component matches `xdg-app-<APPID>-*.scope`.
/// Anything else resolves to the host sentinel (empty app-id).
fn app_id_from_pid(pid: u32) -> AppId {
    let Ok(contents) = std::fs::read_to_string(format!("/proc/{pid}/cgroup")) else {
        return AppId::host();
    };
    for line in contents.lines() {
        let Some(rest) = line.strip_prefix("1:name=systemd:") else {
            continue;
        };
        let Some(scope) = rest.rsplit('/').next() else {
            continue;
        };
        if let Some(app_id) = parse_scope(scope) {
            return AppId::from(app_id);
        }
    }
    AppId::host()
}

/// `xdg-app-<APPID>-<anything>.scope` -> `<APPID>`.
fn parse_scope(scope: &str) -> Option<String> {
    let rest = scope.strip_prefix("xdg-app-")?;
    let rest = rest.strip_suffix(".scope").unwrap_or(rest);
    let app_id = rest.split('-').next()?;
    if app_id.is_empty() {
        None
    } else {
        Some(app_id.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sandboxed_scope() {
        assert_eq!(
            parse_scope("xdg-app-org.example.App-1234.scope"),
            Some("org.example.App".to_owned())
        );
    }

    #[test]
    fn rejects_non_sandbox_scope() {
        assert_eq!(parse_scope("session-2.scope"), None);
    }
}
