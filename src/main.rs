fn main() -> anyhow::Result<()> {
    chat_archive::cli::run()
}
