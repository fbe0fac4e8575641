use dicom_scan_anonymizer::RuleSet;

// Prints the standard rule set as JSON, a starting point for a custom rules file.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let json = RuleSet::standard().to_json()?;
    println!("{json}");
    Ok(())
}
