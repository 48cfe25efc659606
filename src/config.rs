use std::env;
use std::fs;
use std::path::Path;

/// Which inference backend a session drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// llama.cpp-style local engine, GPU capable.
    LlamaCpp,
    /// BitNet-style quantized local engine, CPU only.
    BitNet,
    /// OpenAI-compatible chat-completion endpoint.
    Cloud,
}

impl BackendKind {
    /// Section name this backend reads from the config file.
    fn section(self) -> &'static str {
        match self {
            BackendKind::LlamaCpp => "llamacpp",
            BackendKind::BitNet => "bitnet",
            BackendKind::Cloud => "cloud",
        }
    }

    pub fn is_local(self) -> bool {
        !matches!(self, BackendKind::Cloud)
    }
}

/// How the interpreter uses the NLU layer for input parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NluMode {
    Disabled,
    /// Rewrite input to English verb/noun, let the interpreter's own
    /// matcher do the rest. Fast.
    #[default]
    Extraction,
    /// Ask the model directly whether input means the expected command.
    /// Slower, more precise.
    Semantic,
}

/// Tunables for one backend session. Immutable once `NluSession::init` has
/// consumed it.
#[derive(Debug, Clone)]
pub struct NluConfig {
    pub backend: BackendKind,
    /// Model file path for local backends, model name for cloud.
    pub model_path: String,
    pub api_key: String,
    pub api_endpoint: String,
    pub context_size: usize,
    pub batch_size: usize,
    pub u_batch_size: usize,
    pub n_threads: usize,
    /// Extraction/matching temperature. 0.0 keeps those calls deterministic.
    pub temperature: f32,
    pub temperature_creative_base: f32,
    pub temperature_creative_offset: f32,
    pub top_p: f32,
    pub top_k: i32,
    pub max_tokens: usize,
    pub use_gpu: bool,
    pub flash_attn: bool,
    pub verbose: bool,
    pub mode: NluMode,
    /// Rotating sequence lanes. The engine is asked for one extra lane on
    /// top of this for language detection.
    pub n_seq_max: usize,
}

impl Default for NluConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::LlamaCpp,
            model_path: String::new(),
            api_key: String::new(),
            api_endpoint: String::new(),
            context_size: 4096,
            batch_size: 1024,
            u_batch_size: 512,
            n_threads: 4,
            temperature: 0.0,
            temperature_creative_base: 0.3,
            temperature_creative_offset: 0.2,
            top_p: 0.9,
            top_k: 40,
            max_tokens: 512,
            use_gpu: true,
            flash_attn: false,
            verbose: false,
            mode: NluMode::Extraction,
            n_seq_max: 8,
        }
    }
}

impl NluConfig {
    /// Load configuration for `backend` from a sectioned key=value file.
    ///
    /// A `[common]` section applies to every backend; the section named
    /// after the backend supplies backend-specific fields. A missing file
    /// or missing key leaves the documented default in place - loading
    /// never fails.
    pub fn load(path: impl AsRef<Path>, backend: BackendKind) -> Self {
        let path = path.as_ref();

        let mut config = match fs::read_to_string(path) {
            Ok(contents) => Self::from_ini_str(&contents, backend),
            Err(e) => {
                tracing::warn!(
                    "Config file not readable at {} ({e}) - using defaults",
                    path.display()
                );
                Self {
                    backend,
                    ..Self::default()
                }
            }
        };

        config.apply_env_overrides();

        if let Err(e) = config.validate() {
            tracing::warn!("Config validation warnings: {e} - continuing anyway");
        }

        config
    }

    /// Parse configuration from file contents. Unknown keys and sections
    /// for other backends are ignored.
    pub fn from_ini_str(contents: &str, backend: BackendKind) -> Self {
        let mut config = Self {
            backend,
            ..Self::default()
        };

        let mut current_section = String::new();

        for raw_line in contents.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(section) = parse_section_header(line) {
                current_section = section.to_string();
                continue;
            }

            let Some((key, value)) = parse_key_value(line) else {
                continue;
            };

            if current_section == "common" {
                config.apply_common(key, value);
            } else if current_section == backend.section() {
                config.apply_backend(key, value);
            }
        }

        config
    }

    fn apply_common(&mut self, key: &str, value: &str) {
        match key {
            "temperature_extraction" => set_parsed(&mut self.temperature, key, value),
            "temperature_creative_base" => {
                set_parsed(&mut self.temperature_creative_base, key, value)
            }
            "temperature_creative_offset" => {
                set_parsed(&mut self.temperature_creative_offset, key, value)
            }
            "max_tokens" => set_parsed(&mut self.max_tokens, key, value),
            "verbose" => self.verbose = parse_flag(value),
            "mode" => match value {
                "disabled" | "0" => self.mode = NluMode::Disabled,
                "extraction" | "1" => self.mode = NluMode::Extraction,
                "semantic" | "2" => self.mode = NluMode::Semantic,
                other => tracing::warn!("Unknown mode '{other}' in config - keeping default"),
            },
            _ => {}
        }
    }

    fn apply_backend(&mut self, key: &str, value: &str) {
        if self.backend.is_local() {
            match key {
                "context_size" => set_parsed(&mut self.context_size, key, value),
                "batch_size" => set_parsed(&mut self.batch_size, key, value),
                "u_batch_size" => set_parsed(&mut self.u_batch_size, key, value),
                "n_threads" => set_parsed(&mut self.n_threads, key, value),
                "top_p" => set_parsed(&mut self.top_p, key, value),
                "top_k" => set_parsed(&mut self.top_k, key, value),
                "use_gpu" => self.use_gpu = parse_flag(value),
                "flash_attn" => self.flash_attn = parse_flag(value),
                "n_seq_max" => set_parsed(&mut self.n_seq_max, key, value),
                _ => {}
            }
        } else {
            match key {
                "api_url" => self.api_endpoint = value.to_string(),
                "api_key" => self.api_key = value.to_string(),
                "model" => self.model_path = value.to_string(),
                _ => {}
            }
        }
    }

    /// Pick up the API credential from the environment so it never has to
    /// live in the config file. A `.env` alongside the game is honored.
    fn apply_env_overrides(&mut self) {
        let _ = dotenvy::dotenv();

        if let Ok(key) = env::var("AGI_NLU_API_KEY") {
            self.api_key = key;
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.n_seq_max == 0 {
            return Err("n_seq_max cannot be 0".to_string());
        }
        if self.batch_size == 0 {
            return Err("batch_size cannot be 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err("top_p must be between 0.0 and 1.0".to_string());
        }
        if self.temperature_creative_offset < 0.0 {
            return Err("temperature_creative_offset cannot be negative".to_string());
        }
        if self.backend == BackendKind::Cloud && self.api_key.is_empty() {
            return Err("cloud backend has no api_key (set AGI_NLU_API_KEY)".to_string());
        }
        Ok(())
    }
}

fn parse_section_header(line: &str) -> Option<&str> {
    let rest = line.strip_prefix('[')?;
    let end = rest.find(']')?;
    Some(rest[..end].trim())
}

fn parse_key_value(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key, value.trim()))
}

fn parse_flag(value: &str) -> bool {
    matches!(value, "1" | "true" | "yes" | "on")
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, key: &str, value: &str) {
    match value.parse() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!("Ignoring unparseable value '{value}' for {key}"),
    }
}
