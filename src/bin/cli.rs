//! iotflash command line interface.

use std::{env, process};

use clap::{
    crate_authors, crate_description, crate_name, crate_version, value_t, App, AppSettings::*, Arg,
    ArgMatches, SubCommand,
};
use console::style;
use log::{debug, trace};
use serialport::{DataBits, FlowControl, Parity, StopBits};

use iotflash::{self as iot, commands, config, logging, Error};

fn main() {
    if let Err(e) = ctrlc::set_handler(move || {
        println!("🛑 received Ctrl+C!");
        process::exit(0);
    }) {
        eprintln!("[-] cannot install the Ctrl-C handler: {}", e);
    }

    let version = format!("v{}", crate_version!());
    let mut app = App::new(crate_name!())
        .version(version.as_str())
        .author(crate_authors!())
        .about(crate_description!())
        .long_about(
            "\n\
            iotflash downloads the OS image of a single-board IoT device, \
            optionally configures it and flashes it: \n\
               \t* SD card boards (Raspberry Pi, BeagleBone, NanoPi) get their \
            image edited in the staging environment, then written to a \
            removable disk \n\
               \t* Colibri modules get an update image built in staging, \
            written to an SD card and installed from U-Boot \n\
               \t* Edison and ESP boards are flashed over USB with the vendor \
            tools and configured over their serial console \n\
            \n\
            The staging environment is a small sandbox reached over SSH; its \
            connection is set in the configuration file written by \
            `iotflash install`.\
        ",
        )
        .max_term_width(80)
        .setting(ColoredHelp)
        .setting(NextLineHelp)
        .setting(SubcommandRequiredElseHelp)
        .setting(VersionlessSubcommands)
        .arg(
            Arg::with_name("v")
                .short("v")
                .multiple(true)
                .global(true)
                .help(
                    "Sets the logging level of verbosity, repeat several times for \
                     higher verbosity",
                ),
        )
        .subcommand(
            SubCommand::with_name("flash")
                .about("download, configure and flash an image to a device")
                .arg(
                    Arg::with_name("QUIET")
                        .help("never ask: no configuration, no write confirmation")
                        .short("q")
                        .long("quiet"),
                )
                .args(&device_args())
                .args(&serial_args()),
        )
        .subcommand(
            SubCommand::with_name("configure")
                .about("flash a device, always going through the configuration")
                .args(&device_args())
                .args(&serial_args()),
        )
        .subcommand(
            SubCommand::with_name("list")
                .about("list supported devices or removable disks")
                .setting(SubcommandRequiredElseHelp)
                .subcommand(SubCommand::with_name("devices").about("devices of the manifest"))
                .subcommand(SubCommand::with_name("disks").about("removable disks")),
        )
        .subcommand(
            SubCommand::with_name("install")
                .about("write the default configuration and check the staging environment"),
        )
        .subcommand(
            SubCommand::with_name("uninstall")
                .about("remove downloaded images, the log and the configuration"),
        )
        .subcommand(SubCommand::with_name("update").about("refresh the device manifest"))
        .subcommand(SubCommand::with_name("log").about("print the log file"));

    if cfg!(windows) {
        app = app.subcommand(
            SubCommand::with_name("clean")
                .about("erase every partition of a removable disk")
                .arg(disk_arg())
                .arg(
                    Arg::with_name("QUIET")
                        .help("do not ask for confirmation")
                        .short("q")
                        .long("quiet"),
                ),
        );
    }

    let matches = app.get_matches();

    // Vary the output based on how many times the user used the "verbose" flag
    // (i.e. 'iotflash -v -v -v flash' or 'iotflash flash -vvv')
    let verbosity = match matches.subcommand() {
        (_, Some(sub)) => matches.occurrences_of("v").max(sub.occurrences_of("v")),
        _ => matches.occurrences_of("v"),
    };
    let cache = config::cache_dir().unwrap_or_else(|_| env::temp_dir().join("iotflash"));
    if let Err(e) = logging::init(logging::level_for(verbosity), &cache) {
        eprintln!("[-] cannot set up logging: {}", e);
    }

    trace!("{:#?}", matches);

    let result = match matches.subcommand() {
        ("flash", Some(sub)) => commands::flash(&settings_from(sub)),
        ("configure", Some(sub)) => commands::configure(&settings_from(sub)),
        ("list", Some(sub)) => match sub.subcommand_name() {
            Some("devices") => commands::list_devices(),
            Some("disks") => commands::list_disks(),
            _ => unreachable!(),
        },
        ("install", _) => commands::install(),
        ("uninstall", _) => commands::uninstall(),
        ("update", _) => commands::update(),
        ("log", _) => commands::log(),
        ("clean", Some(sub)) => commands::clean(&settings_from(sub)),
        _ => unreachable!(),
    };

    let exit_code = match result {
        Ok(()) => 0,
        Err(Error::Declined) => {
            println!("[-] Cancelled");
            0
        }
        Err(e) => {
            println!("[-] {}: {}", style("Error").red(), e);
            e.exit_code()
        }
    };
    debug!("exit code: {}", exit_code);
    process::exit(exit_code);
}

fn device_args<'a, 'b>() -> Vec<Arg<'a, 'b>> {
    vec![
        Arg::with_name("DEVICE")
            .help("device name or alias, see `iotflash list devices`")
            .index(1),
        Arg::with_name("IMAGE")
            .help("image URL or local path")
            .long_help(
                "image URL or local path; when not set, the image is picked \
                 from the device's catalog.",
            )
            .index(2),
        disk_arg(),
    ]
}

fn disk_arg<'a, 'b>() -> Arg<'a, 'b> {
    Arg::with_name("DISK")
        .help("removable disk to write, e.g. /dev/sdb")
        .short("d")
        .long("disk")
        .takes_value(true)
        .require_equals(true)
}

fn serial_args<'a, 'b>() -> Vec<Arg<'a, 'b>> {
    vec![
        Arg::with_name("PORT")
            .help("serial port of the device, or `auto`")
            .long_help(
                "serial port of the device; may change when the board \
                 is unplugged and re-plugged and may differ between \
                 systems. With `auto` the connected USB serial ports \
                 are offered for selection.",
            )
            .short("p")
            .long("port")
            .takes_value(true)
            .require_equals(true),
        Arg::with_name("BAUD_RATE")
            .help("serial port baud rate")
            .long("baud-rate")
            .takes_value(true)
            .default_value("115200")
            .require_equals(true),
        Arg::with_name("DATA_BITS")
            .help("number of bits per character")
            .long("data-bits")
            .takes_value(true)
            .possible_values(&["5", "6", "7", "8"])
            .default_value("8")
            .require_equals(true),
        Arg::with_name("STOP_BITS")
            .help("number of stop bits per byte")
            .long("stop-bits")
            .takes_value(true)
            .possible_values(&["1", "2"])
            .default_value("1")
            .require_equals(true),
        Arg::with_name("PARITY")
            .help("parity checking protocol")
            .long("parity")
            .takes_value(true)
            .possible_values(&["none", "odd", "even"])
            .default_value("none")
            .require_equals(true),
        Arg::with_name("FLOW_CONTROL")
            .help("flow control mode")
            .long("flow-control")
            .takes_value(true)
            .possible_values(&["none", "soft", "hard"])
            .default_value("none")
            .require_equals(true),
    ]
}

fn settings_from(matches: &ArgMatches) -> iot::Settings {
    let mut builder = iot::SettingsBuilder::new().quiet(matches.is_present("QUIET"));

    // Serial line arguments only exist on the commands that may talk to a
    // console; their defaults keep the builder's values otherwise.
    if matches.is_present("BAUD_RATE") {
        let baud_rate = value_t!(matches.value_of("BAUD_RATE"), u32).unwrap_or_else(|_| {
            println!(
                "{}: `{}` needs to be a numeric value",
                style("error").red(),
                style("baud-rate").cyan()
            );
            println!(
                "   {} `{}` is not a valid value",
                style("-->").cyan(),
                style(matches.value_of("BAUD_RATE").unwrap_or_default()).on_red()
            );
            process::exit(1);
        });
        builder = builder.baud_rate(baud_rate);
    }
    if let Some(value) = matches.value_of("DATA_BITS") {
        builder = builder.data_bits(match value {
            "5" => DataBits::Five,
            "6" => DataBits::Six,
            "7" => DataBits::Seven,
            "8" => DataBits::Eight,
            _ => unreachable!(),
        });
    }
    if let Some(value) = matches.value_of("STOP_BITS") {
        builder = builder.stop_bits(match value {
            "1" => StopBits::One,
            "2" => StopBits::Two,
            _ => unreachable!(),
        });
    }
    if let Some(value) = matches.value_of("PARITY") {
        builder = builder.parity(match value {
            "none" => Parity::None,
            "even" => Parity::Even,
            "odd" => Parity::Odd,
            _ => unreachable!(),
        });
    }
    if let Some(value) = matches.value_of("FLOW_CONTROL") {
        builder = builder.flow_control(match value {
            "none" => FlowControl::None,
            "soft" => FlowControl::Software,
            "hard" => FlowControl::Hardware,
            _ => unreachable!(),
        });
    }

    if let Some(device) = matches.value_of("DEVICE") {
        builder = builder.device(device);
    }
    if let Some(image) = matches.value_of("IMAGE") {
        builder = builder.image(image);
    }
    if let Some(disk) = matches.value_of("DISK") {
        builder = builder.disk(disk);
    }
    if let Some(port) = matches.value_of("PORT") {
        builder = builder.path(port);
    }

    builder.finalize()
}
