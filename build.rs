// Build timestamp for `catalog --version`; a failed emit only loses that detail.
fn main() {
    use vergen::{BuildBuilder, Emitter};

    let mut emitter = Emitter::default();
    match BuildBuilder::all_build() {
        Ok(build) => {
            if let Err(e) = emitter.add_instructions(&build) {
                println!("cargo:warning=vergen build instructions skipped: {e}");
            }
        }
        Err(e) => println!("cargo:warning=vergen build info unavailable: {e}"),
    }

    if let Err(e) = emitter.emit() {
        println!("cargo:warning=vergen emit skipped: {e}");
    }
}
