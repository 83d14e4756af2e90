/*!
libflake is the client side of HomestakerOS: it reads a flake's published documents, tracks the
status of the hosts defined in it, and submits configurations to a build backend.

```no_run
# async fn example() {
use libflake::{Backend, BackendUrl, ConfigurationForm, FlakeRepository};

let flake = FlakeRepository::from_github("ponkila", "HomestakerOS");
let schema = flake.fetch_schema().await.expect("no schema published");
let mut form = ConfigurationForm::new(schema, flake.fetch_nodes().await);

let backend = Backend::new(BackendUrl::from_fragment("#backendUrl=http://localhost:8081"));
for artifact in form.submit(&backend).await {
    println!("{} {}", artifact.file, artifact.download_url);
}
# }
```
*/

#[macro_use]
extern crate log;

pub mod backend;
pub mod error;
pub mod flake;
pub mod form;
pub mod status;

pub use backend::{Artifact, Backend, BackendUrl};
pub use error::{Error, Result};
pub use flake::{ArtifactPresence, FlakeRepository};
pub use form::{ConfigurationForm, Template};
pub use status::{BeaconProbe, BlockStatus, NodeInfo, StatusMonitor, StatusSnapshot};
