fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if handle_cli_flags(&args) {
        return;
    }

    // a bare argument is an encoded view string to restore
    let view = args.iter().find(|a| !a.starts_with('-')).cloned();

    if let Err(err) = threadscout::run(view) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn handle_cli_flags(args: &[String]) -> bool {
    let mut iter = args.iter();
    let mut saw_flag = false;
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("threadscout {}", threadscout::VERSION);
                saw_flag = true;
            }
            "--help" | "-h" => {
                println!(
                    "threadscout — browse and search forum threads from the terminal.\n\n  threadscout [VIEW]       Start the browser; VIEW is an encoded view string\n                           from the share action (press y in the app)\n  --login <redirect-url>   Store the session token from a login redirect\n  --logout                 Clear the stored session\n  --version, -V            Show version and exit\n  --help,    -h            Show this help message"
                );
                saw_flag = true;
            }
            "--login" => {
                saw_flag = true;
                let Some(url) = iter.next() else {
                    eprintln!("--login needs the redirect URL from the browser");
                    std::process::exit(2);
                };
                if let Err(err) = store_login(url) {
                    eprintln!("login failed: {err:?}");
                    std::process::exit(1);
                }
                println!("session saved");
            }
            "--logout" => {
                saw_flag = true;
                if let Err(err) = clear_login() {
                    eprintln!("logout failed: {err:?}");
                    std::process::exit(1);
                }
                println!("session cleared");
            }
            _ => {}
        }
    }
    saw_flag
}

fn store_login(redirect_url: &str) -> anyhow::Result<()> {
    let token = threadscout::auth::parse_fragment_token(redirect_url)?;
    let store = threadscout::storage::Store::open(threadscout::storage::Options::default())?;
    let tokens = threadscout::auth::TokenStore::new(store);
    tokens.set(&token, "")
}

fn clear_login() -> anyhow::Result<()> {
    let store = threadscout::storage::Store::open(threadscout::storage::Options::default())?;
    threadscout::auth::TokenStore::new(store).clear()
}
