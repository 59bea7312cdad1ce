mod aliases;

pub use aliases::ModelAliases;
