mod alias;
mod batch;
mod env;
mod execution;
mod output;
pub mod path;
mod pipeline;
mod prototype;
mod redirect;
mod stage;
mod state;

pub use alias::Aliases;
pub use batch::{MapOptions, MapResults};
pub use env::{EnvGuard, Environ};
pub use execution::{check_sudo, Running, StageRun};
pub use output::{Lines, Stdout};
pub use path::{expand_home, find_executable};
pub use pipeline::{CallOptions, Pipeline, Selection};
pub use prototype::Prototype;
pub use redirect::Redirect;
pub use stage::{
    shell_quote, CommandStage, ExecMode, LineStream, Options, Stage, StdinSource, StdinStage,
    TransformFn, TransformStage,
};
pub use state::{Context, Encoding};
