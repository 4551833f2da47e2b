//! tsnative package graph
//!
//! Models the build packages of the toolchain (compiler, declarator, std,
//! tests, playground) and resolves their requires/build-requires edges into
//! a dependency-first build order.

pub mod error;
pub mod graph;
pub mod handle;
pub mod registry;

pub use error::PackageError;
pub use graph::{DependencyGraph, ResolvedGraph, RootRequirements};
pub use handle::{ArtifactLayout, PackageHandle};
pub use registry::{PackageRegistry, PackageSource};

/// Package name of the TypeScript compiler front end.
pub const COMPILER_PACKAGE: &str = "tsnative-compiler";

/// Package name of the runtime standard library.
pub const STD_PACKAGE: &str = "tsnative-std";

/// Package name of the C++ declaration generator.
pub const DECLARATOR_PACKAGE: &str = "tsnative-declarator";
