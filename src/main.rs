use colored::Colorize;

fn main() {
    if let Err(e) = gridbase::run() {
        eprintln!("{} {}", "Error:".bright_red().bold(), e);
        std::process::exit(1);
    }
}
