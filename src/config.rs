//! Coordinator configuration.

/// Tunables for a [`HandshakeCoordinator`](crate::coordinator::HandshakeCoordinator)
/// and its thread registry.
///
/// # Examples
///
/// ```
/// use safepoint_handshake::config::HandshakeConfig;
///
/// let config = HandshakeConfig::default();
/// assert!(config.purge_on_attach);
///
/// let custom = HandshakeConfig {
///     registry_capacity: 256,
///     release_abandoned: false,
///     ..HandshakeConfig::default()
/// };
/// assert_eq!(custom.registry_capacity, 256);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeConfig {
    /// Initial capacity of the registry map.
    pub registry_capacity: usize,
    /// Drop states of terminated threads whenever a new state is created.
    pub purge_on_attach: bool,
    /// Count entries left on a purged state as arrivals, with the action
    /// suppressed, so that waiting requesters are released.
    pub release_abandoned: bool,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            registry_capacity: 64,
            purge_on_attach: true,
            release_abandoned: true,
        }
    }
}
