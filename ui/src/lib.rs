//! Terminal front end shared by the todo assistant and the remote chat client.

pub mod logging;
pub mod table;
pub mod terminal;

pub use table::render_todos;
pub use terminal::Terminal;
