use std::path::PathBuf;
use std::time::Duration;

use clap::{
    App,
    Arg,
    ArgMatches,
    Error as ClapError,
    ErrorKind,
};
use url::Url;

pub struct Settings {
    pub host: String,
    pub port: u16,
    pub root: PathBuf,
    pub server_uri: Option<Url>,
    pub multiuser: bool,
    pub acl: bool,
    pub error_pages: Option<PathBuf>,
    pub threads: usize,
    pub lock_stale: Duration,
    pub lock_retries: u32,
    pub force_user: Option<String>,
    pub mock_auth: bool,
}

const BIND_HOST: &str = "0.0.0.0";
const BIND_PORT: u16 = 8443;
const STORAGE_ROOT: &str = "./data";
const WORKER_THREADS: usize = 4;
const LOCK_STALE_SECS: u64 = 30;
const LOCK_RETRIES: u32 = 10;

fn invalid(name: &str, v: &str) -> ClapError {
    ClapError::with_description(&format!("invalid value '{}' for --{}", v, name), ErrorKind::InvalidValue)
}

impl Settings {

    pub fn new() -> Settings {
        Settings {
            host: BIND_HOST.to_string(),
            port: BIND_PORT,
            root: PathBuf::from(STORAGE_ROOT),
            server_uri: None,
            multiuser: false,
            acl: true,
            error_pages: None,
            threads: WORKER_THREADS,
            lock_stale: Duration::from_secs(LOCK_STALE_SECS),
            lock_retries: LOCK_RETRIES,
            force_user: None,
            mock_auth: false,
        }
    }

    /// Root URL of the store, derived from the bind port unless set explicitly.
    pub fn server_uri(&self) -> Result<Url, url::ParseError> {
        match &self.server_uri {
            Some(v) => Ok(v.clone()),
            None => Url::parse(&format!("http://localhost:{}/", self.port)),
        }
    }

    fn bind_from_args(&mut self, arg: &ArgMatches) -> Result<(), ClapError> {
        match arg.value_of("host") {
            Some(v) => {
                self.host = v.to_string();
            },
            _ => {},
        };

        match arg.value_of("port") {
            Some(v) => {
                self.port = match u16::from_str_radix(v, 10) {
                    Ok(port) => port,
                    Err(_) => {
                        return Err(invalid("port", v));
                    },
                };
            },
            _ => {},
        };

        match arg.value_of("threads") {
            Some(v) => {
                self.threads = match v.parse::<usize>() {
                    Ok(n) if n > 0 => n,
                    _ => {
                        return Err(invalid("threads", v));
                    },
                };
            },
            _ => {},
        };
        Ok(())
    }

    fn storage_from_args(&mut self, arg: &ArgMatches) -> Result<(), ClapError> {
        if let Some(v) = arg.value_of("root") {
            self.root = PathBuf::from(v);
        }
        if let Some(v) = arg.value_of("server_uri") {
            match Url::parse(v) {
                Ok(u) => {
                    self.server_uri = Some(u);
                },
                Err(_) => {
                    return Err(invalid("server-uri", v));
                },
            }
        }
        self.multiuser = arg.is_present("multiuser");
        self.acl = !arg.is_present("no_acl");
        self.error_pages = arg.value_of("error_pages").map(PathBuf::from);

        if let Some(v) = arg.value_of("lock_stale") {
            match v.parse::<u64>() {
                Ok(n) => {
                    self.lock_stale = Duration::from_secs(n);
                },
                Err(_) => {
                    return Err(invalid("lock-stale", v));
                },
            }
        }
        if let Some(v) = arg.value_of("lock_retries") {
            match v.parse::<u32>() {
                Ok(n) => {
                    self.lock_retries = n;
                },
                Err(_) => {
                    return Err(invalid("lock-retries", v));
                },
            }
        }
        Ok(())
    }

    fn auth_from_args(&mut self, arg: &ArgMatches) {
        self.force_user = arg.value_of("force_user").map(|v| v.to_string());
        self.mock_auth = arg.is_present("mock_auth");
    }

    fn app() -> App<'static, 'static> {
        let mut o = App::new("ldpd");
        o = o.version(env!("CARGO_PKG_VERSION"));
        o = o.about("Linked Data Platform server on a filesystem store");
        o = o.arg(
            Arg::with_name("host")
                .long("host")
                .short("h")
                .value_name("Host or ip to bind server to.")
                .takes_value(true)
                );
        o = o.arg(
            Arg::with_name("port")
                .long("port")
                .short("p")
                .value_name("Port to bind server to")
                .takes_value(true)
                );
        o = o.arg(
            Arg::with_name("root")
                .long("root")
                .short("r")
                .value_name("Storage directory")
                .takes_value(true)
                );
        o = o.arg(
            Arg::with_name("server_uri")
                .long("server-uri")
                .value_name("Root URL of the store")
                .takes_value(true)
                );
        o = o.arg(
            Arg::with_name("multiuser")
                .long("multiuser")
                .help("Store each virtual host in its own directory")
                );
        o = o.arg(
            Arg::with_name("no_acl")
                .long("no-acl")
                .help("Do not enforce access control")
                );
        o = o.arg(
            Arg::with_name("error_pages")
                .long("error-pages")
                .value_name("Directory with <status>.html error pages")
                .takes_value(true)
                );
        o = o.arg(
            Arg::with_name("threads")
                .long("threads")
                .short("t")
                .value_name("Number of worker threads")
                .takes_value(true)
                );
        o = o.arg(
            Arg::with_name("lock_stale")
                .long("lock-stale")
                .value_name("Seconds after which a held lock is broken")
                .takes_value(true)
                );
        o = o.arg(
            Arg::with_name("lock_retries")
                .long("lock-retries")
                .value_name("Lock acquisition attempts before giving up")
                .takes_value(true)
                );
        o = o.arg(
            Arg::with_name("force_user")
                .long("force-user")
                .value_name("WebID every request is attributed to")
                .takes_value(true)
                );
        o = o.arg(
            Arg::with_name("mock_auth")
                .long("mock-auth")
                .help("Accept 'Authorization: Mock <webid>' credentials")
                );
        o
    }

    fn from_matches(arg_matches: &ArgMatches) -> Result<Settings, ClapError> {
        let mut settings = Settings::new();
        settings.bind_from_args(arg_matches)?;
        settings.storage_from_args(arg_matches)?;
        settings.auth_from_args(arg_matches);
        Ok(settings)
    }

    pub fn from_args() -> Settings {
        let arg_matches = Settings::app().get_matches();
        match Settings::from_matches(&arg_matches) {
            Ok(v) => v,
            Err(e) => e.exit(),
        }
    }
}

impl Default for Settings {
    fn default() -> Settings {
        Settings::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::Settings;

    #[test]
    fn test_from_matches() {
        let m = Settings::app().get_matches_from(vec!("ldpd", "--port", "9000", "--root", "/tmp/store", "--no-acl", "--lock-stale", "5", "--mock-auth"));
        let s = Settings::from_matches(&m).unwrap();
        assert_eq!(s.port, 9000);
        assert!(!s.acl);
        assert!(s.mock_auth);
        assert_eq!(s.lock_stale, Duration::from_secs(5));
        assert_eq!(s.server_uri().unwrap().as_str(), "http://localhost:9000/");
    }

    #[test]
    fn test_invalid_value() {
        let m = Settings::app().get_matches_from(vec!("ldpd", "--threads", "0"));
        assert!(Settings::from_matches(&m).is_err());
    }
}
