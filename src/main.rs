use clap::Parser;

fn main() {
    let config = studytime_lib::Config::parse();
    if let Err(e) = studytime_lib::run(config) {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
