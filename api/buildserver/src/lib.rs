/*!
# Background

buildserver is the backend of HomestakerOS.  It accepts a host configuration, either as a JSON
document or as the fields of a submitted form, turns it into a Nix flake and runs `nix build` to
produce a kexec-bootable kernel and initrd.

# Endpoints

* `GET /`, `GET /api`: liveness, answers `{"status": "ok"}`.
* `POST /nixosConfig`: build a JSON configuration document.
* `GET /nixosConfig/form`: the blank form rendered from the loaded options schema.
* `POST /nixosConfig/form`: build a url-encoded form submission.
* `GET /builds/{build_id}/{file}`: download an artifact.

Besides the boot files, every build publishes `nixConfig.tar`: the flake it was built from, with
`nixosConfigurations/hostnames.json`, the host's `default.json`/`default.nix` and, when the server
has a schema, `nixosModules/homestakeros/options.json`.

A finished build answers:

```json
{
  "status": "ok",
  "build_id": "6f1c1bd8-...",
  "artifacts": [
    { "file": "bzImage", "download_url": "/builds/6f1c1bd8-.../bzImage", "sha256": "..." }
  ]
}
```

Failures answer `{"status": "error", "message": "..."}` with a 4xx or 5xx status.

# Build tools

Conversion from JSON to a Nix expression is done by `json2nix`, which reads JSON on stdin and
prints Nix on stdout.  Building is done by `nix`.  Both are found on `PATH` unless other command
lines are given.
*/

#[macro_use]
extern crate log;

pub mod model;
pub mod server;
pub mod workspace;

pub use server::controller::{Artifact, BuildOutput, BuildTools, Tool};
pub use server::{serve, Error, OptionsSchema, Result, SharedData};
