//! Build unit planning
//!
//! Each case gets its own build directory under the build root. The
//! directory name is the sanitized relative path plus a short SHA-256 of the
//! unsanitized path, so `a/b.ts` and `a_b.ts` never share a directory.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tsn_packages::{PackageHandle, ResolvedGraph, COMPILER_PACKAGE, DECLARATOR_PACKAGE, STD_PACKAGE};

use super::BuildError;
use crate::discovery::{CaseCategory, TestCase};
use crate::target::TargetConfiguration;
use crate::toolchain::{ToolEnv, UnitSpec};

/// tsconfig handed to the compiler's build script for plain cases
pub const TS_CONFIG: &str = "tsconfig.json";

/// Hex digits of the path digest appended to build directory names
const DIGEST_CHARS: usize = 8;

/// CMake wants forward slashes even on Windows
pub fn to_unix(path: &Path) -> String {
    path.display().to_string().replace('\\', "/")
}

/// Build directory name for a case path.
pub fn build_dir_name(relative_path: &str) -> String {
    let sanitized: String = relative_path
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let digest = hex::encode(Sha256::digest(relative_path.as_bytes()));
    format!("{}-{}", sanitized, &digest[..DIGEST_CHARS])
}

/// The toolchain packages every case build consumes
#[derive(Debug, Clone)]
pub struct ToolchainArtifacts {
    compiler: PackageHandle,
    std: PackageHandle,
    declarator: PackageHandle,
    prefix_path: Vec<PathBuf>,
}

impl ToolchainArtifacts {
    pub fn new(compiler: PackageHandle, std: PackageHandle, declarator: PackageHandle) -> Self {
        let prefix_path = vec![
            declarator.package_folder().to_path_buf(),
            std.package_folder().to_path_buf(),
            compiler.package_folder().to_path_buf(),
        ];
        Self {
            compiler,
            std,
            declarator,
            prefix_path,
        }
    }

    /// Pick the toolchain packages out of a resolved graph.
    pub fn from_graph(graph: &ResolvedGraph) -> Result<Self, BuildError> {
        let take = |name: &str| {
            graph
                .get(name)
                .cloned()
                .ok_or_else(|| BuildError::MissingToolchainPackage(name.to_string()))
        };
        let mut artifacts = Self::new(take(COMPILER_PACKAGE)?, take(STD_PACKAGE)?, take(DECLARATOR_PACKAGE)?);
        artifacts.prefix_path = graph.order().iter().map(|h| h.package_folder().to_path_buf()).collect();
        Ok(artifacts)
    }

    pub fn compiler(&self) -> &PackageHandle {
        &self.compiler
    }

    pub fn std(&self) -> &PackageHandle {
        &self.std
    }

    pub fn declarator(&self) -> &PackageHandle {
        &self.declarator
    }

    /// Folder holding the compiler's generic case build script
    pub fn compiler_script_root(&self) -> &Path {
        self.compiler.package_folder()
    }

    /// First build dir of the std package (shipped `.ts` declarations)
    pub fn std_declarations_dir(&self) -> PathBuf {
        self.std
            .artifacts
            .build_paths()
            .into_iter()
            .next()
            .unwrap_or_else(|| self.std.package_folder().to_path_buf())
    }

    /// `NODE_PATH` exported by the std package
    pub fn node_path(&self) -> Option<&str> {
        self.std.user_info.get("NODE_PATH").map(String::as_str)
    }

    /// Package folders for `CMAKE_PREFIX_PATH`, dependencies first
    pub fn prefix_path(&self) -> &[PathBuf] {
        &self.prefix_path
    }
}

/// Read-only context shared by every unit of a run
#[derive(Debug, Clone)]
pub struct BuildContext<'a> {
    pub target: &'a TargetConfiguration,
    pub artifacts: &'a ToolchainArtifacts,

    /// Parent of all per-case build directories
    pub build_root: PathBuf,

    /// Staged std declarations (`PROJECT_BASE_URL`)
    pub project_base_url: PathBuf,

    /// Test sources root (`SOURCE_DIR`)
    pub source_dir: PathBuf,

    pub env: ToolEnv,

    /// Running under CI (serializes native-integration builds)
    pub ci: bool,
}

impl<'a> BuildContext<'a> {
    pub fn new(target: &'a TargetConfiguration, artifacts: &'a ToolchainArtifacts, build_root: impl Into<PathBuf>) -> Self {
        let build_root = build_root.into();
        Self {
            target,
            artifacts,
            project_base_url: build_root.join("imports").join("declarations"),
            source_dir: build_root.clone(),
            build_root,
            env: ToolEnv::default(),
            ci: false,
        }
    }

    pub fn with_project_base_url(mut self, url: impl Into<PathBuf>) -> Self {
        self.project_base_url = url.into();
        self
    }

    pub fn with_source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.source_dir = dir.into();
        self
    }

    pub fn with_env(mut self, env: ToolEnv) -> Self {
        self.env = env;
        self
    }

    pub fn with_ci(mut self, ci: bool) -> Self {
        self.ci = ci;
        self
    }

    /// Configure variables common to every unit
    pub fn shared_variables(&self) -> BTreeMap<String, String> {
        let mut vars = self.target.toolchain_variables().clone();
        vars.insert("PROJECT_BASE_URL".to_string(), to_unix(&self.project_base_url));
        vars.insert("SOURCE_DIR".to_string(), to_unix(&self.source_dir));

        let prefix: Vec<String> = self.artifacts.prefix_path().iter().map(|p| to_unix(p)).collect();
        if !prefix.is_empty() {
            vars.insert("CMAKE_PREFIX_PATH".to_string(), prefix.join(";"));
        }
        vars
    }
}

/// One isolated configure-and-build invocation for a case
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildUnit {
    pub case: TestCase,
    pub build_dir: PathBuf,
    pub script_root: PathBuf,

    /// Source compiled by the generic build script (plain cases only)
    pub entry_point: Option<PathBuf>,

    pub build_tool_args: Vec<String>,
}

impl BuildUnit {
    pub fn plan(case: &TestCase, ctx: &BuildContext<'_>) -> Self {
        let build_dir = ctx.build_root.join(build_dir_name(&case.relative_path));
        match case.category {
            CaseCategory::PlainSource => Self {
                case: case.clone(),
                build_dir,
                script_root: ctx.artifacts.compiler_script_root().to_path_buf(),
                entry_point: Some(case.source_path.clone()),
                build_tool_args: Vec::new(),
            },
            CaseCategory::NativeIntegration => Self {
                case: case.clone(),
                build_dir,
                script_root: case.source_path.clone(),
                entry_point: None,
                build_tool_args: if ctx.ci { vec!["-j1".to_string()] } else { Vec::new() },
            },
        }
    }

    pub fn to_spec(&self, ctx: &BuildContext<'_>) -> UnitSpec {
        let mut spec = UnitSpec::new(&self.case.relative_path, &self.script_root, &self.build_dir)
            .variables(&ctx.shared_variables())
            .env(ctx.env.clone());
        if let Some(entry) = &self.entry_point {
            spec = spec
                .variable("PROJECT_ENTRY_NAME", to_unix(entry))
                .variable("TS_CONFIG", TS_CONFIG);
        }
        for arg in &self.build_tool_args {
            spec = spec.build_tool_arg(arg.clone());
        }
        spec
    }
}

/// Plan every case; fails if two cases would share a build directory.
pub fn plan_units(cases: &[TestCase], ctx: &BuildContext<'_>) -> Result<Vec<BuildUnit>, BuildError> {
    let mut owners: HashMap<PathBuf, &str> = HashMap::new();
    let mut units = Vec::with_capacity(cases.len());

    for case in cases {
        let unit = BuildUnit::plan(case, ctx);
        if let Some(first) = owners.insert(unit.build_dir.clone(), &case.relative_path) {
            return Err(BuildError::DirectoryCollision {
                dir: unit.build_dir,
                first_case: first.to_string(),
                second_case: case.relative_path.clone(),
            });
        }
        units.push(unit);
    }

    Ok(units)
}
