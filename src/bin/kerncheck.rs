fn main() {
    let code = match kerncheck::cli::run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            kerncheck::cli::exit_code_for(&e)
        }
    };
    std::process::exit(code);
}
