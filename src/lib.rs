/*!
A sliding-window BGP routing-information store: it ingests per-peer BGP
elements (RIB dumps, announcements, withdrawals, peer state changes),
aggregates them into time-bucketed [`View`](view::View)s of every peer's
table, and dispatches each view to subscribed clients once it is judged
`Partial` or `Full`.

# Overview

The store keeps `window_len` consecutive [`View`](view::View)s, one per
`bucket_size_secs`-second bucket of BGP time. Elements are fed in through a
peer's [`PeerFsm`](fsm::PeerFsm), which tracks session state and rejects
anything that arrives out of order or before the peer reaches
`Established`. A view becomes eligible for dispatch once every producing
client has signaled the end of its prefix table for that bucket; the
[`dispatch`] module decides whether that makes the view `Partial` or `Full`
and whether a `FirstFull` notification is owed.

```no_run
use bgpkit_viewstore::config::Config;
use bgpkit_viewstore::store::ViewStore;

let mut store = ViewStore::new(Config::default());
let (_outcome, _events) = store.get_slot(0);
```

Clients attach over the length-prefixed TCP protocol in [`wire`], which
frames each view's peers and prefix tables as described in
[`wire::serialize`].
*/
#![doc(html_logo_url = "https://spaces.bgpkit.org/assets/logos/icon-transparent.png")]
#![doc(html_favicon_url = "https://spaces.bgpkit.org/assets/logos/favicon.ico")]

pub mod config;
pub mod dispatch;
pub mod error;
pub mod fsm;
pub mod models;
pub mod registry;
pub mod store;
pub mod view;
pub mod wire;

pub use config::Config;
pub use error::{ViewStoreError, ViewStoreErrorWithContext, ViewStoreResult};
pub use models::{Element, ElementKind};
pub use store::ViewStore;
pub use view::View;
