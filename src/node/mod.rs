/// cache nodes and their supervisor.
///
/// A node is either a member, holding partitions and able to create backing
/// structures, or a thin client that can only attach and detach listeners
/// and trigger admin commands.  Both run the same command handler: API
/// requests and admin topic deliveries go through one queue and are handled
/// one at a time, so only the handler task ever mutates the registry.
///
pub mod cache_node;
pub mod supervisor;

pub use cache_node::{CacheNode, Command};
pub use supervisor::Supervisor;
