mod helpers;
mod release;
