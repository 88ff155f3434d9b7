//! Concrete agents for the korbux engine and the plugin that installs them.

mod echo;
mod keyword;
mod plugin;

pub use echo::EchoAgent;
pub use keyword::{KeywordAgent, Topic};
pub use plugin::CoreAgentsPlugin;
