use std::path::PathBuf;
use std::time::Duration;

pub const USAGE: &str = "kava [options] classfile [args]
     [options] -jar jarfile [args]

Options:
    -Xmx<size>              size in bytes of the heap
    -Xss<size>              size in bytes of each thread's stack
    -Xgci<millis>           interval between each garbage collection cycle
    -classpath=<classpath>  additional directory to search for classes; may
                            be given multiple times

    <size> must be a multiple of 4096 bytes. It can be suffixed with k, m,
    or g to specify a size in kibibytes, mebibytes, or gibibytes";

/// Everything parsed off the command line. Engine defaults apply for any
/// option left unset.
#[derive(Debug, Default)]
pub struct LaunchOptions {
    pub max_heap: Option<usize>,
    pub stack_size: Option<usize>,
    pub gc_interval: Option<Duration>,
    pub class_path: Vec<PathBuf>,
    pub target: Option<Target>,
    pub program_args: Vec<String>,
}

#[derive(Debug, Eq, PartialEq)]
pub enum Target {
    Class(String),
    Jar(String),
}

/// A `<size>` argument: decimal bytes with an optional k/m/g suffix, which
/// must come out as a multiple of 4096.
fn parse_size(option: &str, text: &str) -> Result<usize, String> {
    if text.is_empty() {
        return Err(format!("Could not parse argument: {}{}", option, text));
    }

    let (digits, shift) = match text.chars().last().unwrap() {
        'k' | 'K' => (&text[..text.len() - 1], 10),
        'm' | 'M' => (&text[..text.len() - 1], 20),
        'g' | 'G' => (&text[..text.len() - 1], 30),
        '0'..='9' => (text, 0),
        _ => return Err(format!("Could not parse argument: {}{}", option, text)),
    };

    let bytes = digits
        .parse::<usize>()
        .map_err(|_| format!("Could not parse argument: {}{}", option, text))?
        << shift;

    if bytes & 0xFFF != 0 {
        return Err(format!("{} must be a multiple of 4096", &option[1..4]));
    }
    Ok(bytes)
}

/// Parses the argument vector `[options] (classname | -jar jarfile)
/// [program args]`. Everything after the target belongs to the program.
pub fn parse<I: IntoIterator<Item = String>>(args: I) -> Result<LaunchOptions, String> {
    let mut options = LaunchOptions::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        if let Some(size) = arg.strip_prefix("-Xmx") {
            options.max_heap = Some(parse_size("-Xmx", size)?);
        } else if let Some(size) = arg.strip_prefix("-Xss") {
            options.stack_size = Some(parse_size("-Xss", size)?);
        } else if let Some(millis) = arg.strip_prefix("-Xgci") {
            let millis = millis
                .parse::<u64>()
                .map_err(|_| format!("Could not parse argument: {}", arg))?;
            options.gc_interval = Some(Duration::from_millis(millis));
        } else if let Some(path) = arg.strip_prefix("-classpath=") {
            if path.is_empty() {
                return Err(format!("Could not parse argument: {}", arg));
            }
            options.class_path.push(PathBuf::from(path));
        } else if arg == "-jar" {
            let jar = args
                .next()
                .ok_or_else(|| "Jar flag was passed without specifying a jar file".to_string())?;
            options.target = Some(Target::Jar(jar));
            options.program_args.extend(args);
            break;
        } else if arg.starts_with('-') {
            return Err(format!("Could not parse argument: {}", arg));
        } else {
            options.target = Some(Target::Class(arg));
            options.program_args.extend(args);
            break;
        }
    }

    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_sizes_with_suffixes() {
        assert_eq!(parse_size("-Xmx", "8192").unwrap(), 8192);
        assert_eq!(parse_size("-Xmx", "4k").unwrap(), 4096);
        assert_eq!(parse_size("-Xmx", "64M").unwrap(), 64 << 20);
        assert_eq!(parse_size("-Xss", "1g").unwrap(), 1 << 30);
    }

    #[test]
    fn rejects_unaligned_or_malformed_sizes() {
        assert!(parse_size("-Xmx", "4097").is_err());
        assert!(parse_size("-Xmx", "12x").is_err());
        assert!(parse_size("-Xmx", "").is_err());
        assert!(parse_size("-Xmx", "k").is_err());
    }

    #[test]
    fn splits_engine_and_program_arguments() {
        let options = parse(strings(&[
            "-Xmx4096k",
            "-classpath=runtime2",
            "demo/Main",
            "-Xmx9999",
            "hello",
        ]))
        .unwrap();

        assert_eq!(options.max_heap, Some(4096 << 10));
        assert_eq!(options.class_path, vec![PathBuf::from("runtime2")]);
        assert_eq!(options.target, Some(Target::Class("demo/Main".into())));
        // Everything after the class name goes to the program untouched.
        assert_eq!(options.program_args, strings(&["-Xmx9999", "hello"]));
    }

    #[test]
    fn jar_flag_consumes_the_next_argument() {
        let options = parse(strings(&["-jar", "app.jar", "x"])).unwrap();
        assert_eq!(options.target, Some(Target::Jar("app.jar".into())));
        assert_eq!(options.program_args, strings(&["x"]));

        assert!(parse(strings(&["-jar"])).is_err());
    }

    #[test]
    fn unknown_options_are_rejected() {
        assert!(parse(strings(&["-Xbogus"])).is_err());
    }
}
