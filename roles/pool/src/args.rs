use std::path::PathBuf;

#[derive(Debug)]
pub struct Args {
    pub config_path: PathBuf,
    /// Replay a share-statistic recovery file instead of serving.
    pub recover: Option<PathBuf>,
}

impl Args {
    const DEFAULT_CONFIG_PATH: &'static str = "forgepool-config.toml";

    const USAGE: &'static str =
        "Usage: forgepool [-c/--config <path>] [-r/--recover <file>] [-h/--help]";

    pub fn from_args() -> Result<Self, String> {
        let mut config_path = PathBuf::from(Self::DEFAULT_CONFIG_PATH);
        let mut recover = None;
        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    config_path = args
                        .next()
                        .map(PathBuf::from)
                        .ok_or_else(|| format!("missing value for {arg}\n{}", Self::USAGE))?;
                }
                "-r" | "--recover" => {
                    recover = Some(
                        args.next()
                            .map(PathBuf::from)
                            .ok_or_else(|| format!("missing value for {arg}\n{}", Self::USAGE))?,
                    );
                }
                "-h" | "--help" => return Err(Self::USAGE.to_string()),
                unexpected => return Err(format!("unexpected argument: {unexpected}\n{}", Self::USAGE)),
            }
        }
        Ok(Self {
            config_path,
            recover,
        })
    }
}
