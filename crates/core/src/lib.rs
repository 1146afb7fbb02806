mod transport;
pub use transport::*;

mod scope;
pub use scope::*;

pub use identity::{Keypair, PeerId, PublicKey};
pub use multiaddr;
