fn main() {
    if let Err(err) = bucketguard::cli::run() {
        bucketguard::ui::eprintln_error(&err);
        std::process::exit(bucketguard::exit::exit_code(&err));
    }
}
