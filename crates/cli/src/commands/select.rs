use anyhow::Result;
use photoindex_core::LibraryConfig;

pub async fn run(config: LibraryConfig, key: &str, selected: bool) -> Result<()> {
    let library = super::open(config)?;
    let result = library.set_selection(key, selected).await;
    library.shutdown().await?;
    result?;

    if selected {
        println!("Selected {key}");
    } else {
        println!("Unselected {key}");
    }
    Ok(())
}
