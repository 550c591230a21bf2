//! Command and certificate filters.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use zerotouch_core::{Authorization, ControlParameters, Name, SecurityOptions};

use super::Responder;

/// A registered command.
///
/// Only requests that passed authorization reach the handler, already
/// decoded. The handler answers through `responder`, at most once.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Handle one authorized request
    async fn handle(&self, params: ControlParameters, auth: Authorization, responder: Responder);
}

#[derive(Clone)]
pub(crate) struct CommandEntry {
    pub(crate) sub: Name,
    pub(crate) options: SecurityOptions,
    pub(crate) handler: Arc<dyn CommandHandler>,
}

/// What an incoming interest resolved to
pub(crate) enum Route {
    Command(CommandEntry),
    Certificate(Name),
}

#[derive(Default)]
pub(crate) struct Registry {
    commands: BTreeMap<Name, Vec<CommandEntry>>,
    certificates: Vec<Name>,
}

impl Registry {
    /// Record a command under `prefix`. Returns true the first time `prefix`
    /// is seen, which is when it has to be registered with the forwarder.
    pub(crate) fn insert_command(&mut self, prefix: &Name, entry: CommandEntry) -> bool {
        let fresh = !self.commands.contains_key(prefix);
        let entries = self.commands.entry(prefix.clone()).or_default();
        entries.retain(|e| e.sub != entry.sub);
        entries.push(entry);
        fresh
    }

    /// Record a certificate filter. Returns false if it already exists.
    pub(crate) fn insert_certificate(&mut self, key_name: &Name) -> bool {
        if self.certificates.contains(key_name) {
            return false;
        }
        self.certificates.push(key_name.clone());
        true
    }

    /// Forget every command under `prefix`
    pub(crate) fn remove_commands(&mut self, prefix: &Name) {
        self.commands.remove(prefix);
    }

    /// Forget a certificate filter
    pub(crate) fn remove_certificate(&mut self, key_name: &Name) {
        self.certificates.retain(|k| k != key_name);
    }

    /// Longest registered prefix of `name`, then the entry whose subname
    /// follows it; otherwise the longest certificate filter.
    pub(crate) fn lookup(&self, name: &Name) -> Option<Route> {
        let command = self
            .commands
            .iter()
            .filter(|(prefix, _)| prefix.is_prefix_of(name))
            .max_by_key(|(prefix, _)| prefix.len())
            .and_then(|(prefix, entries)| {
                entries
                    .iter()
                    .find(|e| prefix.clone().append_name(&e.sub).is_prefix_of(name))
            });
        if let Some(entry) = command {
            return Some(Route::Command(entry.clone()));
        }

        self.certificates
            .iter()
            .filter(|key_name| key_name.is_prefix_of(name))
            .max_by_key(|key_name| key_name.len())
            .map(|key_name| Route::Certificate(key_name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl CommandHandler for Noop {
        async fn handle(&self, _: ControlParameters, _: Authorization, _: Responder) {}
    }

    fn name(s: &str) -> Name {
        s.parse().unwrap()
    }

    fn entry(sub: &str) -> CommandEntry {
        CommandEntry {
            sub: name(sub),
            options: SecurityOptions::open(),
            handler: Arc::new(Noop),
        }
    }

    fn sub_of(route: Option<Route>) -> Option<String> {
        match route? {
            Route::Command(e) => Some(e.sub.to_string()),
            Route::Certificate(n) => Some(format!("cert:{n}")),
        }
    }

    #[test]
    fn test_prefix_registered_once() {
        let mut registry = Registry::default();
        assert!(registry.insert_command(&name("/localhost"), entry("/add-device")));
        assert!(!registry.insert_command(&name("/localhost"), entry("/other")));
    }

    #[test]
    fn test_removed_prefix_is_fresh_again() {
        let mut registry = Registry::default();
        assert!(registry.insert_command(&name("/localhost"), entry("/add-device")));
        registry.remove_commands(&name("/localhost"));
        assert!(registry.lookup(&name("/localhost/add-device/x")).is_none());
        assert!(registry.insert_command(&name("/localhost"), entry("/add-device")));

        assert!(registry.insert_certificate(&name("/dev/KEY/01")));
        registry.remove_certificate(&name("/dev/KEY/01"));
        assert!(registry.insert_certificate(&name("/dev/KEY/01")));
    }

    #[test]
    fn test_longest_prefix_wins() {
        let mut registry = Registry::default();
        registry.insert_command(&name("/home"), entry("/as/apply-cert"));
        registry.insert_command(&name("/home/as/apply-cert"), entry("/dev1"));

        let found = registry.lookup(&name("/home/as/apply-cert/dev1/p/t/n/i/s"));
        assert_eq!(sub_of(found).as_deref(), Some("/dev1"));
    }

    #[test]
    fn test_subname_must_match() {
        let mut registry = Registry::default();
        registry.insert_command(&name("/home/as/apply-cert"), entry("/dev1"));
        assert!(registry.lookup(&name("/home/as/apply-cert/dev2/x")).is_none());
    }

    #[test]
    fn test_certificate_filter() {
        let mut registry = Registry::default();
        assert!(registry.insert_certificate(&name("/dev/KEY/01")));
        assert!(!registry.insert_certificate(&name("/dev/KEY/01")));
        let found = registry.lookup(&name("/dev/KEY/01"));
        assert_eq!(sub_of(found).as_deref(), Some("cert:/dev/KEY/01"));
    }
}
