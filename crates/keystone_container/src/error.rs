//! Error types for configuration and resolution.
//!
//! Every failure raised by the container is a [`KeystoneError`]. Each variant
//! maps to a stable numeric [`ErrorCode`] so callers and tests can match on
//! the code instead of the message text, and to an [`ErrorKind`] that
//! separates configuration mistakes from failures inside user code.

use core::fmt;

use crate::types::TypeKey;

/// Boxed error returned by builder closures and interceptors.
pub type BoxError = Box<dyn core::error::Error + Send + Sync + 'static>;

/// Broad classification of a [`KeystoneError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The plugin graph was described incorrectly.
    Configuration,
    /// A lookup during resolution found nothing to build.
    Resolution,
    /// User construction code failed.
    Construction,
    /// A post-construction interceptor failed.
    Interception,
}

/// Stable numeric code of a [`KeystoneError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    /// Plugged type is not assignable to the plugin type.
    NotAssignable = 104,
    /// Plugin registered with an empty concrete key.
    MissingConcreteKey = 112,
    /// Concrete key reused for a different plugged type.
    DuplicateConcreteKey = 113,
    /// Generic key closed with the wrong arguments.
    InvalidGenericArguments = 120,
    /// Mutation attempted on a sealed graph.
    GraphSealed = 130,
    /// Registry depends on a registry that was not added.
    RegistryDependencyMissing = 140,
    /// Registries depend on each other in a cycle.
    RegistryCycle = 141,
    /// Unique registry added twice.
    DuplicateRegistry = 142,
    /// Container settings could not be read.
    InvalidSettings = 150,
    /// Configuration validation found problems.
    InvalidConfiguration = 160,
    /// No instance with the requested name.
    UnknownInstance = 200,
    /// No plugin with the requested concrete key.
    UnknownConcreteKey = 201,
    /// No default instance for the plugin type.
    NoDefaultInstance = 202,
    /// Primitive argument without a configured value.
    MissingPrimitiveArgument = 205,
    /// Configured value could not be converted.
    ConversionFailed = 206,
    /// User construction code failed.
    ConstructionFailed = 207,
    /// No family for the plugin type.
    FamilyNotFound = 208,
    /// Builder asked for an argument that was not resolved.
    MissingArgument = 209,
    /// No construction capability for the plugged type.
    BuilderNotFound = 245,
    /// Built object does not match the requested type.
    WrongType = 250,
    /// Required scope is not active.
    ScopeNotActive = 260,
    /// Instance interceptor failed.
    InstanceInterceptionFailed = 270,
    /// Requested profile does not exist.
    ProfileNotFound = 280,
    /// Instance depends on itself.
    CyclicDependency = 295,
    /// Type interceptor failed.
    TypeInterceptionFailed = 308,
}

impl ErrorCode {
    /// Returns the numeric value of the code.
    #[must_use]
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the kind of failure this code belongs to.
    #[must_use]
    pub fn kind(self) -> ErrorKind {
        match self {
            Self::NotAssignable
            | Self::MissingConcreteKey
            | Self::DuplicateConcreteKey
            | Self::InvalidGenericArguments
            | Self::GraphSealed
            | Self::RegistryDependencyMissing
            | Self::RegistryCycle
            | Self::DuplicateRegistry
            | Self::InvalidSettings
            | Self::InvalidConfiguration
            | Self::MissingPrimitiveArgument
            | Self::ConversionFailed
            | Self::ProfileNotFound => ErrorKind::Configuration,
            Self::UnknownInstance
            | Self::UnknownConcreteKey
            | Self::NoDefaultInstance
            | Self::FamilyNotFound
            | Self::BuilderNotFound
            | Self::WrongType
            | Self::ScopeNotActive
            | Self::CyclicDependency => ErrorKind::Resolution,
            Self::ConstructionFailed | Self::MissingArgument => ErrorKind::Construction,
            Self::InstanceInterceptionFailed | Self::TypeInterceptionFailed => {
                ErrorKind::Interception
            }
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// Errors raised while configuring the graph or resolving instances.
#[derive(Debug, thiserror::Error)]
pub enum KeystoneError {
    /// The plugged type cannot be used as the plugin type.
    #[error("plugged type {plugged_type} is not assignable to plugin type {plugin_type}")]
    NotAssignable {
        /// The concrete type being registered.
        plugged_type: TypeKey,
        /// The family's plugin type.
        plugin_type: TypeKey,
    },

    /// A plugin was registered without a concrete key.
    #[error("plugin for {plugged_type} has an empty concrete key")]
    MissingConcreteKey {
        /// The concrete type being registered.
        plugged_type: TypeKey,
    },

    /// A concrete key is already bound to another plugged type.
    #[error(
        "concrete key '{key}' of plugin type {plugin_type} is bound to {existing}, not {plugged_type}"
    )]
    DuplicateConcreteKey {
        /// The clashing key.
        key: String,
        /// The family's plugin type.
        plugin_type: TypeKey,
        /// The type already registered under the key.
        existing: TypeKey,
        /// The type that was rejected.
        plugged_type: TypeKey,
    },

    /// A generic key could not be closed with the given arguments.
    #[error("cannot close {key} with {given} type argument(s)")]
    InvalidGenericArguments {
        /// The key being closed.
        key: TypeKey,
        /// Number of arguments supplied.
        given: usize,
    },

    /// The graph no longer accepts mutation.
    #[error("the plugin graph is sealed, cannot {operation}")]
    GraphSealed {
        /// The rejected operation.
        operation: &'static str,
    },

    /// A registry depends on another registry that was never added.
    #[error("registry '{registry}' requires '{dependency}' which was not added")]
    RegistryDependencyMissing {
        /// The dependent registry.
        registry: String,
        /// The missing dependency.
        dependency: &'static str,
    },

    /// Registries depend on each other in a cycle.
    #[error("circular dependency detected among registries: {registries:?}")]
    RegistryCycle {
        /// Registries involved in the cycle.
        registries: Vec<String>,
    },

    /// A unique registry was added twice.
    #[error("registry '{0}' is unique and was already added")]
    DuplicateRegistry(String),

    /// Container settings could not be parsed.
    #[error("invalid container settings: {0}")]
    InvalidSettings(String),

    /// Validation of the whole configuration found problems.
    #[error(
        "container configuration is invalid ({} problem(s)):\n{}",
        .problems.len(),
        .problems.join("\n")
    )]
    InvalidConfiguration {
        /// One line per problem.
        problems: Vec<String>,
    },

    /// No instance with this name exists for the plugin type.
    #[error("could not find an instance named '{name}' for plugin type {plugin_type}")]
    UnknownInstance {
        /// The requested name.
        name: String,
        /// The requested plugin type.
        plugin_type: TypeKey,
    },

    /// No plugin with this concrete key exists for the plugin type.
    #[error("could not find a plugin with concrete key '{key}' for plugin type {plugin_type}")]
    UnknownConcreteKey {
        /// The requested key.
        key: String,
        /// The requested plugin type.
        plugin_type: TypeKey,
    },

    /// The plugin type has no default instance.
    #[error("no default instance is defined for plugin type {plugin_type}")]
    NoDefaultInstance {
        /// The requested plugin type.
        plugin_type: TypeKey,
    },

    /// A primitive argument has no value and primitives are never defaulted.
    #[error(
        "missing primitive argument '{argument}' ({argument_type}) for instance '{instance}' of {concrete_type}"
    )]
    MissingPrimitiveArgument {
        /// The argument name.
        argument: String,
        /// The argument type.
        argument_type: TypeKey,
        /// The instance being built.
        instance: String,
        /// The concrete type being built.
        concrete_type: TypeKey,
    },

    /// A configured value could not be converted to the argument type.
    #[error("could not convert '{value}' for argument '{argument}' to {target}: {reason}")]
    ConversionFailed {
        /// The argument name.
        argument: String,
        /// The raw value.
        value: String,
        /// The argument type.
        target: TypeKey,
        /// Why conversion failed.
        reason: String,
    },

    /// User construction code failed.
    #[error("error while building instance '{instance}' of plugin type {plugin_type}")]
    ConstructionFailed {
        /// The instance being built.
        instance: String,
        /// The plugin type being built.
        plugin_type: TypeKey,
        /// The original failure.
        #[source]
        source: BoxError,
    },

    /// No family exists for the plugin type.
    #[error("no plugin family is registered for plugin type {plugin_type}")]
    FamilyNotFound {
        /// The requested plugin type.
        plugin_type: TypeKey,
    },

    /// A builder asked for an argument that was not declared or resolved.
    #[error("argument '{argument}' was not resolved for {concrete_type}")]
    MissingArgument {
        /// The argument name.
        argument: String,
        /// The concrete type being built.
        concrete_type: TypeKey,
    },

    /// No construction capability is registered for the plugged type.
    #[error(
        "no builder found for plugged type {plugged_type} (instance '{instance}', plugin type {plugin_type})"
    )]
    BuilderNotFound {
        /// The concrete type to build.
        plugged_type: TypeKey,
        /// The instance being built.
        instance: String,
        /// The requested plugin type.
        plugin_type: TypeKey,
    },

    /// A built object cannot be used as the requested type.
    #[error("object of type {actual} cannot be used as {expected}")]
    WrongType {
        /// The requested type.
        expected: TypeKey,
        /// The concrete type of the object.
        actual: TypeKey,
    },

    /// A lifecycle requires a scope that is not active.
    #[error("scope '{scope}' is not active while building instance '{instance}'")]
    ScopeNotActive {
        /// The required scope name.
        scope: String,
        /// The instance being built.
        instance: String,
    },

    /// An instance interceptor failed.
    #[error("instance specific interception failed for '{instance}' of plugin type {plugin_type}")]
    InstanceInterceptionFailed {
        /// The instance being intercepted.
        instance: String,
        /// The plugin type being built.
        plugin_type: TypeKey,
        /// The original failure.
        #[source]
        source: BoxError,
    },

    /// The requested profile does not exist.
    #[error("requested profile '{0}' does not exist")]
    ProfileNotFound(String),

    /// An instance depends on itself.
    #[error("cyclic dependency detected while building '{instance}' of {plugin_type}:\n{stack}")]
    CyclicDependency {
        /// The instance that was re-entered.
        instance: String,
        /// The plugin type being built.
        plugin_type: TypeKey,
        /// The rendered build stack.
        stack: String,
    },

    /// A type interceptor failed.
    #[error("type interception failed for instance '{instance}' built as {built_type}")]
    TypeInterceptionFailed {
        /// The instance being intercepted.
        instance: String,
        /// The concrete type that was built.
        built_type: TypeKey,
        /// The original failure.
        #[source]
        source: BoxError,
    },
}

impl KeystoneError {
    /// Returns the stable numeric code of this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotAssignable { .. } => ErrorCode::NotAssignable,
            Self::MissingConcreteKey { .. } => ErrorCode::MissingConcreteKey,
            Self::DuplicateConcreteKey { .. } => ErrorCode::DuplicateConcreteKey,
            Self::InvalidGenericArguments { .. } => ErrorCode::InvalidGenericArguments,
            Self::GraphSealed { .. } => ErrorCode::GraphSealed,
            Self::RegistryDependencyMissing { .. } => ErrorCode::RegistryDependencyMissing,
            Self::RegistryCycle { .. } => ErrorCode::RegistryCycle,
            Self::DuplicateRegistry(_) => ErrorCode::DuplicateRegistry,
            Self::InvalidSettings(_) => ErrorCode::InvalidSettings,
            Self::InvalidConfiguration { .. } => ErrorCode::InvalidConfiguration,
            Self::UnknownInstance { .. } => ErrorCode::UnknownInstance,
            Self::UnknownConcreteKey { .. } => ErrorCode::UnknownConcreteKey,
            Self::NoDefaultInstance { .. } => ErrorCode::NoDefaultInstance,
            Self::MissingPrimitiveArgument { .. } => ErrorCode::MissingPrimitiveArgument,
            Self::ConversionFailed { .. } => ErrorCode::ConversionFailed,
            Self::ConstructionFailed { .. } => ErrorCode::ConstructionFailed,
            Self::FamilyNotFound { .. } => ErrorCode::FamilyNotFound,
            Self::MissingArgument { .. } => ErrorCode::MissingArgument,
            Self::BuilderNotFound { .. } => ErrorCode::BuilderNotFound,
            Self::WrongType { .. } => ErrorCode::WrongType,
            Self::ScopeNotActive { .. } => ErrorCode::ScopeNotActive,
            Self::InstanceInterceptionFailed { .. } => ErrorCode::InstanceInterceptionFailed,
            Self::ProfileNotFound(_) => ErrorCode::ProfileNotFound,
            Self::CyclicDependency { .. } => ErrorCode::CyclicDependency,
            Self::TypeInterceptionFailed { .. } => ErrorCode::TypeInterceptionFailed,
        }
    }

    /// Returns the kind of failure.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.code().kind()
    }

    /// Converts a failure raised by construction code.
    ///
    /// Keystone errors raised by nested resolution pass through unchanged so
    /// the innermost cause keeps its code; anything else is wrapped as
    /// [`KeystoneError::ConstructionFailed`].
    pub(crate) fn from_build_error(error: BoxError, instance: &str, plugin_type: &TypeKey) -> Self {
        match error.downcast::<KeystoneError>() {
            Ok(inner) => *inner,
            Err(source) => Self::ConstructionFailed {
                instance: instance.to_string(),
                plugin_type: plugin_type.clone(),
                source,
            },
        }
    }
}
