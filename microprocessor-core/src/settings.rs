use serde::Deserialize;

pub const UNIT_OF_WORK_MODE_VAR: &str = "MICROPROCESSOR_UNIT_OF_WORK_MODE";
pub const MAX_OPERATION_DEPTH_VAR: &str = "MICROPROCESSOR_MAX_OPERATION_DEPTH";

/// Policy that decides when and how enlisted resource managers are flushed.
///
/// Unknown values are kept as [`UnitOfWorkMode::Invalid`] rather than rejected while parsing:
/// they only surface as an error once a unit of work is committed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "String")]
pub enum UnitOfWorkMode {
	/// Every enlisted resource manager is flushed right away.
	Disabled,
	#[default]
	SingleThreaded,
	MultiThreaded,
	Invalid(String),
}

impl From<&str> for UnitOfWorkMode {
	fn from(value: &str) -> Self {
		match value.trim().to_ascii_lowercase().as_str() {
			"disabled" => Self::Disabled,
			"singlethreaded" | "single_threaded" => Self::SingleThreaded,
			"multithreaded" | "multi_threaded" => Self::MultiThreaded,
			_ => Self::Invalid(value.to_string()),
		}
	}
}

impl From<String> for UnitOfWorkMode {
	fn from(value: String) -> Self {
		value.as_str().into()
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProcessorSettings {
	pub unit_of_work_mode: UnitOfWorkMode,
	/// Deepest branch operation a dispatch may reach; the root operation has depth 1.
	pub max_operation_depth: usize,
}

impl Default for ProcessorSettings {
	fn default() -> Self {
		Self {
			unit_of_work_mode: UnitOfWorkMode::default(),
			max_operation_depth: 128,
		}
	}
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
	#[error("malformed processor settings: {0}")]
	Json(#[from] serde_json::Error),
	#[error("{var} must be a positive integer, got '{value}'")]
	InvalidNumber { var: &'static str, value: String },
}

impl ProcessorSettings {
	pub fn from_json(json: &str) -> Result<Self, SettingsError> {
		Ok(serde_json::from_str(json)?)
	}

	/// Defaults overridden by `MICROPROCESSOR_*` environment variables.
	pub fn from_env() -> Result<Self, SettingsError> {
		let mut settings = Self::default();
		if let Ok(mode) = std::env::var(UNIT_OF_WORK_MODE_VAR) {
			settings.unit_of_work_mode = mode.into();
		}
		if let Ok(depth) = std::env::var(MAX_OPERATION_DEPTH_VAR) {
			settings.max_operation_depth = match depth.trim().parse::<usize>() {
				Ok(depth) if depth > 0 => depth,
				_ => {
					return Err(SettingsError::InvalidNumber {
						var: MAX_OPERATION_DEPTH_VAR,
						value: depth,
					})
				}
			};
		}
		Ok(settings)
	}

	pub fn with_unit_of_work_mode(mut self, mode: UnitOfWorkMode) -> Self {
		self.unit_of_work_mode = mode;
		self
	}

	pub fn with_max_operation_depth(mut self, depth: usize) -> Self {
		self.max_operation_depth = depth;
		self
	}
}
