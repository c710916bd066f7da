use std::env;

use color_eyre::eyre::{OptionExt, Result};

pub struct CliArgs {
    pub input_file_path: String,
}

impl CliArgs {
    pub fn load() -> Result<Self> {
        CliArgs::parse(env::args().skip(1))
    }

    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self> {
        let input_file_path = args
            .next()
            .filter(|path| !path.trim().is_empty())
            .ok_or_eyre("Input file not passed")?;

        Ok(CliArgs { input_file_path })
    }
}
