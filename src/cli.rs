use argh::FromArgs;

#[derive(FromArgs, PartialEq, Debug)]
/// rootstrap: build a Debian-family root filesystem image
pub(crate) struct Rootstrap {
    /// name of the definition under definitions/<name>.json (no dots, no slashes)
    #[argh(positional)]
    pub name: String,
}
