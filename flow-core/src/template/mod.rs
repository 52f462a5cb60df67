//! The line oriented document template language.
//!
//! ```text
//! #header
//! ID,NAME
//! #end
//! #body
//! #row delimiter="\n"
//! #column delimiter=","
//! $SOURCE$
//! #end
//! #end
//! #end
//! ```
pub mod node;
pub mod parser;
pub mod registry;
pub mod render;

pub use node::{Container, ContainerKind, TemplateNode};
pub use registry::TemplateRegistry;
pub use render::DocumentTemplate;
